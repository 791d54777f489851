//! Export utilities for decision trees
//!
//! Provides DOT graph export and a plain-text outline.

use crate::hierarchy::{build_hierarchy, NodeWithChildren};
use crate::model::{DecisionAnswer, NodeKind, NodeType, TreeSnapshot};
use std::collections::HashSet;
use std::fmt::{self, Write};

/// Configuration for DOT export
#[derive(Debug, Clone)]
pub struct DotConfig {
    /// Title for the graph; defaults to the tree name
    pub title: Option<String>,
    /// Label answer edges with the answer text
    pub show_answers: bool,
    /// Include node IDs in labels
    pub show_ids: bool,
    /// Orientation: "TB" (top-bottom), "LR" (left-right)
    pub rankdir: String,
}

impl Default for DotConfig {
    fn default() -> Self {
        Self {
            title: None,
            show_answers: true,
            show_ids: true,
            rankdir: "TB".to_string(),
        }
    }
}

/// Get the shape for a node type
fn node_shape(node_type: NodeType) -> &'static str {
    match node_type {
        NodeType::Question => "diamond",
        NodeType::Diagnosis => "ellipse",
        NodeType::Tests => "box",
    }
}

/// Get the fill color for a node type
fn node_color(node_type: NodeType) -> &'static str {
    match node_type {
        NodeType::Question => "#E6E6FA",  // Lavender
        NodeType::Diagnosis => "#FFE4B5", // Moccasin
        NodeType::Tests => "#90EE90",     // Light green
    }
}

/// Escape a string for DOT labels
fn escape_dot(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

/// Truncate a string to at most `max_len` characters
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

fn node_label(kind: &NodeKind) -> String {
    match kind {
        NodeKind::Question { text } => truncate(text, 40),
        NodeKind::Diagnosis { .. } => format!("Diagnosis\n{}", kind.summary()),
        NodeKind::Tests { .. } => format!("Tests\n{}", kind.summary()),
    }
}

/// Convert a tree to DOT format.
///
/// Answers become labelled edges from their question. Parent links that no
/// answer covers are drawn dashed. An answer without a next node ends in a
/// red `?` so unfinished branches stand out.
pub fn tree_to_dot(snapshot: &TreeSnapshot, config: &DotConfig) -> String {
    let mut dot = String::new();
    write_dot(&mut dot, snapshot, config).expect("writing to a String cannot fail");
    dot
}

fn write_dot(dot: &mut String, snapshot: &TreeSnapshot, config: &DotConfig) -> fmt::Result {
    writeln!(dot, "digraph DecisionTree {{")?;
    writeln!(dot, "  rankdir={};", config.rankdir)?;
    writeln!(dot, "  node [fontname=\"Arial\" fontsize=10];")?;
    writeln!(dot, "  edge [fontname=\"Arial\" fontsize=9];")?;

    let title = config.title.as_deref().unwrap_or(&snapshot.tree.name);
    writeln!(dot, "  label=\"{}\";", escape_dot(title))?;
    writeln!(dot, "  labelloc=t;")?;
    writeln!(dot, "  fontsize=14;")?;
    writeln!(dot)?;

    for node in &snapshot.nodes {
        let mut label = String::new();
        if config.show_ids {
            write!(label, "[{}] ", node.id)?;
        }
        label.push_str(&node_label(&node.kind));

        writeln!(
            dot,
            "  {} [label=\"{}\" shape=\"{}\" fillcolor=\"{}\" style=\"filled\"];",
            node.id,
            escape_dot(&label),
            node_shape(node.node_type()),
            node_color(node.node_type())
        )?;
    }

    writeln!(dot)?;

    let known: HashSet<i32> = snapshot.nodes.iter().map(|n| n.id).collect();
    let mut covered: HashSet<(i32, i32)> = HashSet::new();

    for answer in &snapshot.answers {
        let label = if config.show_answers {
            format!(" label=\"{}\"", escape_dot(&truncate(&answer.answer_text, 30)))
        } else {
            String::new()
        };

        match answer.next_node_id.filter(|next| known.contains(next)) {
            Some(next) => {
                covered.insert((answer.node_id, next));
                writeln!(
                    dot,
                    "  {} -> {} [color=\"#333333\"{}];",
                    answer.node_id, next, label
                )?;
            }
            None => {
                writeln!(
                    dot,
                    "  a{} [label=\"?\" shape=\"plaintext\" fontcolor=\"#DC143C\"];",
                    answer.id
                )?;
                writeln!(
                    dot,
                    "  {} -> a{} [style=\"dotted\" color=\"#DC143C\"{}];",
                    answer.node_id, answer.id, label
                )?;
            }
        }
    }

    for node in &snapshot.nodes {
        if let Some(parent) = node.parent_node_id {
            if known.contains(&parent) && !covered.contains(&(parent, node.id)) {
                writeln!(
                    dot,
                    "  {} -> {} [style=\"dashed\" color=\"#999999\"];",
                    parent, node.id
                )?;
            }
        }
    }

    writeln!(dot, "}}")?;
    Ok(())
}

/// Indented text view of a tree: nodes by hierarchy, each question followed
/// by its answers.
pub fn render_outline(snapshot: &TreeSnapshot) -> String {
    let mut out = String::new();
    write_outline(&mut out, snapshot).expect("writing to a String cannot fail");
    out
}

fn write_outline(out: &mut String, snapshot: &TreeSnapshot) -> fmt::Result {
    let description = snapshot
        .tree
        .description
        .as_deref()
        .map(|d| format!(" - {}", d))
        .unwrap_or_default();
    writeln!(out, "{} (tree {}){}", snapshot.tree.name, snapshot.tree.id, description)?;

    let forest = build_hierarchy(&snapshot.nodes);
    if forest.is_empty() {
        writeln!(out, "  (no nodes)")?;
    }
    for root in &forest {
        write_outline_node(out, snapshot, root, 1)?;
    }
    Ok(())
}

fn write_outline_node(
    out: &mut String,
    snapshot: &TreeSnapshot,
    entry: &NodeWithChildren,
    depth: usize,
) -> fmt::Result {
    let indent = "  ".repeat(depth);
    let node = &entry.node;
    let marker = match node.node_type() {
        NodeType::Question => "?",
        NodeType::Diagnosis => "Dx",
        NodeType::Tests => "Tx",
    };
    writeln!(out, "{}[{}] {} {}", indent, node.id, marker, node.kind.summary())?;

    let answers: Vec<&DecisionAnswer> = snapshot.answers_for(node.id).collect();
    for answer in answers {
        match answer.next_node_id {
            Some(next) => writeln!(out, "{}  - {} -> [{}]", indent, answer.answer_text, next)?,
            None => writeln!(out, "{}  - {} -> (no next node)", indent, answer.answer_text)?,
        }
    }

    for child in &entry.children {
        write_outline_node(out, snapshot, child, depth + 1)?;
    }
    Ok(())
}
