use serde_json::Value;

use crate::row::canonical_string;

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 16_777_619;

/// FNV-1a de 32 bits sobre bytes.
pub fn fnv32a(data: &[u8]) -> u32 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in data {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Partición destino de una clave: fnv32a(forma canónica) % num_partitions.
/// Tiene que ser idéntica en los dos lados de un shuffle.
pub fn hash_partition(key: &Value, num_partitions: u32) -> u32 {
    let canonical = canonical_string(key);
    fnv32a(canonical.as_bytes()) % num_partitions.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fnv32a_valores_conocidos() {
        // vectores de referencia de FNV-1a 32 bits
        assert_eq!(fnv32a(b""), 0x811c_9dc5);
        assert_eq!(fnv32a(b"a"), 0xe40c_292c);
        assert_eq!(fnv32a(b"foobar"), 0xbf9c_f968);
    }

    #[test]
    fn hash_partition_retorna_id_en_rango() {
        let n = 10;
        for key in ["a", "b", "c", "xyz", "otro"] {
            let pid = hash_partition(&json!(key), n);
            assert!(pid < n);
        }
    }

    #[test]
    fn hash_partition_es_determinista() {
        for key in [json!("k1"), json!(42), json!({"id": "u1"})] {
            let first = hash_partition(&key, 7);
            for _ in 0..5 {
                assert_eq!(hash_partition(&key, 7), first);
            }
        }
    }

    #[test]
    fn hash_partition_clave_numerica_y_string_coinciden() {
        // "3" como string y 3 como número caen en la misma partición:
        // las dos formas canónicas son "3"
        assert_eq!(
            hash_partition(&json!(3), 5),
            hash_partition(&json!("3"), 5)
        );
    }
}
