// clinitree schema - decision tree tables for Diesel ORM

diesel::table! {
    schema_versions (id) {
        id -> Integer,
        version -> Text,
        name -> Text,
        features -> Text,
        introduced_at -> Text,
    }
}

diesel::table! {
    topographic_zones (id) {
        id -> Integer,
        region -> Text,
        name -> Text,
    }
}

diesel::table! {
    decision_trees (id) {
        id -> Integer,
        topographic_zone_id -> Integer,
        name -> Text,
        description -> Nullable<Text>,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    decision_nodes (id) {
        id -> Integer,
        tree_id -> Integer,
        parent_node_id -> Nullable<Integer>,
        node_type -> Text,              // 'question', 'diagnosis', 'tests'
        question_text -> Nullable<Text>,
        pathology_ids -> Nullable<Text>, // JSON array
        test_ids -> Nullable<Text>,      // JSON array
        cluster_ids -> Nullable<Text>,   // JSON array
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    decision_answers (id) {
        id -> Integer,
        node_id -> Integer,
        answer_text -> Text,
        display_order -> Integer,
        next_node_id -> Nullable<Integer>,
        created_at -> Text,
    }
}

// ============================================================================
// Reference catalog - targets of diagnosis and tests nodes
// ============================================================================

diesel::table! {
    pathologies (id) {
        id -> Integer,
        name -> Text,
        topographic_zone_id -> Nullable<Integer>,
    }
}

diesel::table! {
    orthopedic_tests (id) {
        id -> Integer,
        name -> Text,
        topographic_zone_id -> Nullable<Integer>,
    }
}

diesel::table! {
    orthopedic_test_clusters (id) {
        id -> Integer,
        name -> Text,
        topographic_zone_id -> Nullable<Integer>,
        test_ids -> Text,                // JSON array
    }
}

diesel::joinable!(decision_trees -> topographic_zones (topographic_zone_id));
diesel::joinable!(decision_nodes -> decision_trees (tree_id));
diesel::joinable!(decision_answers -> decision_nodes (node_id));

diesel::allow_tables_to_appear_in_same_query!(
    topographic_zones,
    decision_trees,
    decision_nodes,
    decision_answers,
);
