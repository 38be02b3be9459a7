// Esquema Diesel de las tablas del motor que se consultan con el DSL.
// El resto de tablas comparte la misma forma (id, kind, rev, data) y se
// accede con SQL del catálogo de sentencias.
diesel::table! {
    act_ge_property (id) {
        id -> Text,
        kind -> Text,
        rev -> Nullable<Integer>,
        data -> Text,
    }
}
