// Table definition for the SQLite document store.

diesel::table! {
    documents (index_name, id) {
        index_name -> Text,
        id -> Text,
        body -> Text,
        seq_no -> BigInt,
    }
}
