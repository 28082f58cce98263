use std::{
    collections::BTreeSet,
    fs::{self, File},
    io::{self, BufRead, BufReader, BufWriter, Write},
    path::Path,
};

use serde_json::{Map, Value};

use crate::row::Row;

/* =========================
   Texto plano
   ========================= */

/// Lee un archivo de texto como líneas UTF-8.
pub fn read_text_lines(path: &str) -> io::Result<Vec<String>> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    reader.lines().collect()
}

/// Convierte el trozo de líneas de una partición en filas:
/// clave = índice secuencial dentro de la partición, valor = la línea.
pub fn rows_from_lines(lines: &[String]) -> Vec<Row> {
    lines
        .iter()
        .enumerate()
        .map(|(i, line)| Row::new(i as u64, line.as_str()))
        .collect()
}

/* =========================
   CSV
   ========================= */

/// Lee un CSV con encabezado. Cada fila de datos se vuelve
/// `{ key: fila[key_column], value: mapa columna→string }`
/// (la columna clave no se repite dentro del mapa).
pub fn read_csv_rows(path: &str, key_column: &str) -> io::Result<Vec<Row>> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut lines = reader.lines();

    let header_line = match lines.next() {
        Some(l) => l?,
        None => return Ok(Vec::new()),
    };

    // BOM por si el archivo viene de Excel/Windows
    let header_line = header_line.trim_start_matches('\u{feff}');
    let headers = parse_csv_line(header_line);

    let mut out = Vec::new();
    for line in lines {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let fields = parse_csv_line(&line);
        let mut key = Value::Null;
        let mut value = Map::new();

        for (i, header) in headers.iter().enumerate() {
            let field = fields.get(i).cloned().unwrap_or_default();
            if header == key_column {
                key = Value::String(field);
            } else {
                value.insert(header.clone(), Value::String(field));
            }
        }

        out.push(Row {
            key,
            value: Value::Object(value),
        });
    }

    Ok(out)
}

/// Parser de una línea CSV con comillas: un `"` literal dentro de un
/// campo va duplicado (`""`) y el campo entero entre comillas.
pub fn parse_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut chars = line.chars().peekable();
    let mut in_quotes = false;

    while let Some(c) = chars.next() {
        if in_quotes {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    field.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            } else {
                field.push(c);
            }
        } else {
            match c {
                '"' => in_quotes = true,
                ',' => fields.push(std::mem::take(&mut field)),
                _ => field.push(c),
            }
        }
    }

    fields.push(field);
    fields
}

fn escape_csv_field(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Escribe filas como CSV de resultado: encabezado `id` seguido de las
/// claves del mapa de valores en orden alfabético; `id` sale de la clave.
pub fn write_csv_rows(path: &str, rows: &[Row]) -> io::Result<()> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let out = File::create(path)?;
    let mut writer = BufWriter::new(out);

    // unión de campos de todas las filas, ordenada para salida estable
    let mut columns: BTreeSet<String> = BTreeSet::new();
    for row in rows {
        if let Some(obj) = row.value.as_object() {
            columns.extend(obj.keys().cloned());
        }
    }

    let mut header = vec!["id".to_string()];
    header.extend(columns.iter().cloned());
    writeln!(writer, "{}", header.join(","))?;

    for row in rows {
        let mut record = vec![escape_csv_field(&row.key_string())];
        for column in &columns {
            let field = row
                .value
                .as_object()
                .and_then(|obj| obj.get(column))
                .map(field_string)
                .unwrap_or_default();
            record.push(escape_csv_field(&field));
        }
        writeln!(writer, "{}", record.join(","))?;
    }

    writer.flush()?;
    Ok(())
}

fn field_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/* =========================
   JSONL
   ========================= */

/// Escribe filas como JSONL, un objeto `{key, value}` por línea.
pub fn write_jsonl_rows(path: &str, rows: &[Row]) -> io::Result<()> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let out = File::create(path)?;
    let mut writer = BufWriter::new(out);

    for row in rows {
        serde_json::to_writer(&mut writer, row)?;
        writer.write_all(b"\n")?;
    }

    writer.flush()?;
    Ok(())
}

pub fn read_jsonl_rows(path: &str) -> io::Result<Vec<Row>> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);

    let mut out = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        // objetos {key, value} salidos de write_jsonl_rows; cualquier
        // otro objeto se envuelve como valor con clave nula
        match serde_json::from_str::<Row>(&line) {
            Ok(row) => out.push(row),
            Err(_) => {
                let value: Value = serde_json::from_str(&line)?;
                out.push(Row {
                    key: Value::Null,
                    value,
                });
            }
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::{env, path::PathBuf};

    fn temp_dir(sub: &str) -> PathBuf {
        let base = env::temp_dir().join("codec_tests").join(sub);
        let _ = fs::remove_dir_all(&base);
        fs::create_dir_all(&base).unwrap();
        base
    }

    #[test]
    fn rows_from_lines_numera_dentro_de_la_particion() {
        let lines = vec!["ab".to_string(), "cdef".to_string()];
        let rows = rows_from_lines(&lines);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], Row::new(0u64, "ab"));
        assert_eq!(rows[1], Row::new(1u64, "cdef"));
    }

    #[test]
    fn parse_csv_line_separa_campos_simples() {
        assert_eq!(parse_csv_line("a,b,c"), vec!["a", "b", "c"]);
        assert_eq!(parse_csv_line("a,,c"), vec!["a", "", "c"]);
    }

    #[test]
    fn parse_csv_line_respeta_comillas_y_escapes() {
        assert_eq!(
            parse_csv_line(r#"1,"hola, mundo",x"#),
            vec!["1", "hola, mundo", "x"]
        );
        assert_eq!(
            parse_csv_line(r#"1,"dijo ""hola""",x"#),
            vec!["1", r#"dijo "hola""#, "x"]
        );
    }

    #[test]
    fn read_csv_rows_usa_la_columna_clave() {
        let tmp = temp_dir("read_csv");
        let path = tmp.join("data.csv");
        let mut f = File::create(&path).unwrap();
        writeln!(f, "product_id,brand,price").unwrap();
        writeln!(f, "1,acme,10").unwrap();
        writeln!(f, "2,globex,20").unwrap();

        let rows = read_csv_rows(path.to_str().unwrap(), "product_id").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].key, json!("1"));
        assert_eq!(rows[0].value, json!({"brand": "acme", "price": "10"}));
        // la columna clave no se repite en el valor
        assert!(rows[0].value.get("product_id").is_none());
    }

    #[test]
    fn write_csv_rows_encabezado_id_mas_columnas_ordenadas() {
        let tmp = temp_dir("write_csv");
        let path = tmp.join("out.csv");

        let rows = vec![
            Row::new("2", json!({"category": "tools", "brand": "acme"})),
            Row::new("3", json!({"brand": "globex", "customer_id": "c9"})),
        ];
        write_csv_rows(path.to_str().unwrap(), &rows).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "id,brand,category,customer_id");
        assert_eq!(lines[1], "2,acme,tools,");
        assert_eq!(lines[2], "3,globex,,c9");
    }

    #[test]
    fn write_csv_rows_escapa_comas_y_comillas() {
        let tmp = temp_dir("write_csv_escape");
        let path = tmp.join("out.csv");

        let rows = vec![Row::new("1", json!({"desc": "hola, \"mundo\""}))];
        write_csv_rows(path.to_str().unwrap(), &rows).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[1], r#"1,"hola, ""mundo""""#);
        // y el parser lo recupera igual
        assert_eq!(parse_csv_line(lines[1])[1], "hola, \"mundo\"");
    }

    #[test]
    fn jsonl_roundtrip_preserva_filas() {
        let tmp = temp_dir("jsonl");
        let path = tmp.join("out.jsonl");

        let rows = vec![
            Row::new("a", 1),
            Row::new(2, json!({"x": "y"})),
        ];
        write_jsonl_rows(path.to_str().unwrap(), &rows).unwrap();
        let back = read_jsonl_rows(path.to_str().unwrap()).unwrap();
        assert_eq!(back, rows);
    }
}
