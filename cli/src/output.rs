use serde_json::{Map, Value, json};
use sql_access_layer::mapper::row_value_to_json;
use sql_access_layer::prelude::*;

pub(crate) fn row(row: &CustomDbRow) -> Value {
    Value::Object(
        row.column_names
            .iter()
            .zip(&row.rows)
            .map(|(name, value)| (name.clone(), row_value_to_json(value)))
            .collect::<Map<_, _>>(),
    )
}

pub(crate) fn result_set(set: &ResultSet) -> Value {
    json!({
        "columns": set.get_column_names().map(|c| c.as_slice()).unwrap_or_default(),
        "rows": set.results.iter().map(row).collect::<Vec<_>>(),
        "rows_affected": set.rows_affected,
    })
}

pub(crate) fn outputs(values: &OutputValues) -> Value {
    let mut map: Map<String, Value> = values
        .iter()
        .map(|(name, value)| (name.to_string(), row_value_to_json(value)))
        .collect();
    if let Some(ret) = values.return_value() {
        map.insert("@return".to_string(), row_value_to_json(ret));
    }
    Value::Object(map)
}

pub(crate) fn data_set(data: &DataSet) -> Value {
    json!({
        "result_sets": data.result_sets.iter().map(result_set).collect::<Vec<_>>(),
        "outputs": outputs(&data.outputs),
    })
}

pub(crate) fn execute_outcome(outcome: &ExecuteOutcome) -> Value {
    json!({
        "rows_affected": outcome.rows_affected,
        "outputs": outputs(&outcome.outputs),
    })
}
