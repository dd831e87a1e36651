// Diesel table definitions for the table store.
// Kept in sync by hand with the DDL in repository::pool::SCHEMA_SQL.

diesel::table! {
    tables (table_id) {
        table_id -> Text,
        source_file -> Text,
        row_count -> BigInt,
        column_count -> BigInt,
        column_names -> Text,
        column_types -> Text,
        description -> Nullable<Text>,
        session_id -> Nullable<Text>,
        created_at -> Text,
    }
}

diesel::table! {
    table_data (id) {
        id -> Integer,
        table_id -> Text,
        row_index -> BigInt,
        row_data -> Text,
    }
}

diesel::table! {
    processing_sessions (session_id) {
        session_id -> Text,
        source_file -> Text,
        total_tables -> BigInt,
        successful_tables -> BigInt,
        created_at -> Text,
        completed_at -> Nullable<Text>,
    }
}

diesel::joinable!(table_data -> tables (table_id));

diesel::allow_tables_to_appear_in_same_query!(tables, table_data, processing_sessions,);
