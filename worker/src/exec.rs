use std::collections::{BTreeMap, HashMap};

use serde_json::Value;

use common::error::EngineError;
use common::registry::{FunctionRegistry, RowFunction};
use common::row::Row;
use common::transform::{TransformOp, Transformation};

/// Ejecuta el pipeline de una tarea sobre las filas locales, descriptor
/// a descriptor en orden estricto.
pub fn execute_pipeline(
    registry: &FunctionRegistry,
    pipeline: &[Transformation],
    mut rows: Vec<Row>,
) -> Result<Vec<Row>, EngineError> {
    for transformation in pipeline {
        rows = apply_transformation(registry, transformation, rows)?;
    }
    Ok(rows)
}

fn apply_transformation(
    registry: &FunctionRegistry,
    t: &Transformation,
    rows: Vec<Row>,
) -> Result<Vec<Row>, EngineError> {
    match t.op {
        TransformOp::Map => match registry.get(&t.func_name) {
            Some(RowFunction::Map(f)) => Ok(rows.iter().map(f).collect()),
            _ => Err(unknown_function(t)),
        },

        TransformOp::Filter => match registry.get(&t.func_name) {
            Some(RowFunction::Filter(f)) => Ok(rows.into_iter().filter(|row| f(row)).collect()),
            _ => Err(unknown_function(t)),
        },

        TransformOp::FlatMap => match registry.get(&t.func_name) {
            Some(RowFunction::FlatMap(f)) => Ok(rows.iter().flat_map(f).collect()),
            _ => Err(unknown_function(t)),
        },

        // plegado a una sola fila; entrada vacía → fila cero
        TransformOp::Reduce => match registry.get(&t.func_name) {
            Some(RowFunction::Reduce(f)) => {
                let mut iter = rows.into_iter();
                match iter.next() {
                    None => Ok(vec![Row::empty()]),
                    Some(first) => {
                        let folded = iter.fold(first, |acc, row| f(&acc, &row));
                        Ok(vec![folded])
                    }
                }
            }
            _ => Err(unknown_function(t)),
        },

        // agrupa por la forma canónica de la clave y pliega cada grupo;
        // BTreeMap deja la salida ordenada por clave, determinista
        TransformOp::ReduceByKey => match registry.get(&t.func_name) {
            Some(RowFunction::Reduce(f)) => {
                let mut groups: BTreeMap<String, Vec<Row>> = BTreeMap::new();
                for row in rows {
                    groups.entry(row.key_string()).or_default().push(row);
                }

                let mut out = Vec::with_capacity(groups.len());
                for (_, group) in groups {
                    let mut iter = group.into_iter();
                    let Some(first) = iter.next() else { continue };
                    let key = first.key.clone();
                    let folded = iter.fold(first, |acc, row| f(&acc, &row));
                    out.push(Row {
                        key,
                        value: folded.value,
                    });
                }
                Ok(out)
            }
            _ => Err(unknown_function(t)),
        },

        TransformOp::Shuffle | TransformOp::Join => Err(EngineError::Config(format!(
            "la operación {:?} la coordina el driver, no es ejecutable localmente",
            t.op
        ))),
    }
}

fn unknown_function(t: &Transformation) -> EngineError {
    EngineError::UnknownFunction(format!("{} (op {:?})", t.func_name, t.op))
}

/// Join interno local: indexa la derecha por clave, recorre la
/// izquierda y emite una fila combinada por cada par que coincide.
pub fn hash_join(left: Vec<Row>, right: Vec<Row>) -> Vec<Row> {
    let mut index: HashMap<String, Vec<Row>> = HashMap::new();
    for row in right {
        index.entry(row.key_string()).or_default().push(row);
    }

    let mut out = Vec::new();
    for left_row in left {
        let Some(matches) = index.get(&left_row.key_string()) else {
            continue;
        };
        for right_row in matches {
            out.push(merge_rows(&left_row, right_row));
        }
    }
    out
}

/// Combina dos filas con la misma clave. Valores objeto se fusionan
/// campo a campo: en conflicto gana la izquierda y el campo derecho se
/// conserva con prefijo `right_`. Valores no-objeto quedan como par.
fn merge_rows(left: &Row, right: &Row) -> Row {
    match (left.value.as_object(), right.value.as_object()) {
        (Some(left_obj), Some(right_obj)) => {
            let mut merged = left_obj.clone();
            for (field, value) in right_obj {
                if merged.contains_key(field) {
                    merged.insert(format!("right_{field}"), value.clone());
                } else {
                    merged.insert(field.clone(), value.clone());
                }
            }
            Row {
                key: left.key.clone(),
                value: Value::Object(merged),
            }
        }
        _ => Row {
            key: left.key.clone(),
            value: Value::Array(vec![left.value.clone(), right.value.clone()]),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> FunctionRegistry {
        FunctionRegistry::with_builtins()
    }

    fn lines_rows(lines: &[&str]) -> Vec<Row> {
        lines
            .iter()
            .enumerate()
            .map(|(i, line)| Row::new(i as u64, *line))
            .collect()
    }

    #[test]
    fn pipeline_aplica_descriptores_en_orden() {
        // map(ToUpper) → filter(IsLong) sobre ["ab","cdef","ghij","klmno"]
        let pipeline = vec![
            Transformation::new(TransformOp::Map, "ToUpper"),
            Transformation::new(TransformOp::Filter, "IsLong"),
        ];
        let rows = lines_rows(&["ab", "cdef", "ghij", "klmno"]);

        let out = execute_pipeline(&registry(), &pipeline, rows).unwrap();
        let values: Vec<&str> = out.iter().map(|r| r.value.as_str().unwrap()).collect();
        assert_eq!(values, vec!["CDEF", "GHIJ", "KLMNO"]);
    }

    #[test]
    fn transformaciones_angostas_preservan_el_orden_de_entrada() {
        let pipeline = vec![Transformation::new(TransformOp::Map, "ToUpper")];
        let rows = lines_rows(&["zz", "aa", "mm"]);
        let out = execute_pipeline(&registry(), &pipeline, rows).unwrap();
        let values: Vec<&str> = out.iter().map(|r| r.value.as_str().unwrap()).collect();
        assert_eq!(values, vec!["ZZ", "AA", "MM"]);
    }

    #[test]
    fn reduce_max_pliega_a_una_sola_fila() {
        let pipeline = vec![Transformation::new(TransformOp::Reduce, "Max")];
        let rows = lines_rows(&["7", "2", "9", "4"]);
        let out = execute_pipeline(&registry(), &pipeline, rows).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].value, json!(9));
    }

    #[test]
    fn reduce_sobre_vacio_devuelve_fila_cero() {
        let pipeline = vec![Transformation::new(TransformOp::Reduce, "Max")];
        let out = execute_pipeline(&registry(), &pipeline, Vec::new()).unwrap();
        assert_eq!(out, vec![Row::empty()]);
    }

    #[test]
    fn reduce_by_key_agrupa_y_ordena_por_clave() {
        let pipeline = vec![Transformation::new(TransformOp::ReduceByKey, "Sum")];
        let rows = vec![
            Row::new("b", 1),
            Row::new("a", 2),
            Row::new("b", 3),
            Row::new("a", 5),
        ];
        let out = execute_pipeline(&registry(), &pipeline, rows).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].key, json!("a"));
        assert_eq!(out[0].value, json!(7));
        assert_eq!(out[1].key, json!("b"));
        assert_eq!(out[1].value, json!(4));
    }

    #[test]
    fn funcion_desconocida_falla_la_tarea() {
        let pipeline = vec![Transformation::new(TransformOp::Map, "NoExiste")];
        let err = execute_pipeline(&registry(), &pipeline, lines_rows(&["x"])).unwrap_err();
        assert_eq!(err.code(), "UnknownFunction");
    }

    #[test]
    fn funcion_de_tipo_incorrecto_tambien_falla() {
        // Max está registrada, pero es de reducción, no de map
        let pipeline = vec![Transformation::new(TransformOp::Map, "Max")];
        let err = execute_pipeline(&registry(), &pipeline, lines_rows(&["x"])).unwrap_err();
        assert_eq!(err.code(), "UnknownFunction");
    }

    #[test]
    fn tipo_inesperado_no_tumba_la_tarea() {
        // ToUpper sobre un número degrada a identidad y el pipeline sigue
        let pipeline = vec![Transformation::new(TransformOp::Map, "ToUpper")];
        let rows = vec![Row::new(0, 42), Row::new(1, "ok")];
        let out = execute_pipeline(&registry(), &pipeline, rows).unwrap();
        assert_eq!(out[0].value, json!(42));
        assert_eq!(out[1].value, json!("OK"));
    }

    #[test]
    fn hash_join_es_un_inner_join_por_clave() {
        let left = vec![
            Row::new("1", json!({"customer_id": "c1"})),
            Row::new("2", json!({"customer_id": "c2"})),
            Row::new("3", json!({"customer_id": "c3"})),
        ];
        let right = vec![
            Row::new("2", json!({"brand": "acme"})),
            Row::new("3", json!({"brand": "globex"})),
            Row::new("4", json!({"brand": "initech"})),
        ];

        let mut keys: Vec<String> = hash_join(left, right)
            .iter()
            .map(|r| r.key_string())
            .collect();
        keys.sort();
        assert_eq!(keys, vec!["2", "3"]);
    }

    #[test]
    fn hash_join_emite_el_producto_de_los_pares_que_coinciden() {
        let left = vec![
            Row::new("k", json!({"a": "1"})),
            Row::new("k", json!({"a": "2"})),
        ];
        let right = vec![
            Row::new("k", json!({"b": "x"})),
            Row::new("k", json!({"b": "y"})),
        ];
        // 2 izquierdas × 2 derechas con la misma clave → 4 combinadas
        assert_eq!(hash_join(left, right).len(), 4);
    }

    #[test]
    fn merge_rows_combina_campos_y_prefija_conflictos() {
        let left = Row::new("2", json!({"customer_id": "c2", "fecha": "L"}));
        let right = Row::new("2", json!({"brand": "acme", "fecha": "R"}));

        let merged = merge_rows(&left, &right);
        assert_eq!(merged.key, json!("2"));
        assert_eq!(merged.value["customer_id"], json!("c2"));
        assert_eq!(merged.value["brand"], json!("acme"));
        // gana la izquierda y el campo derecho queda con prefijo
        assert_eq!(merged.value["fecha"], json!("L"));
        assert_eq!(merged.value["right_fecha"], json!("R"));
    }

    #[test]
    fn merge_rows_con_valores_no_objeto_deja_el_par() {
        let merged = merge_rows(&Row::new("k", "izq"), &Row::new("k", "der"));
        assert_eq!(merged.value, json!(["izq", "der"]));
    }

    #[test]
    fn shuffle_y_join_no_son_ejecutables_en_el_worker() {
        let pipeline = vec![Transformation::new(TransformOp::Shuffle, "")];
        let err = execute_pipeline(&registry(), &pipeline, Vec::new()).unwrap_err();
        assert_eq!(err.code(), "ConfigError");
    }
}
