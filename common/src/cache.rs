use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc, Mutex, RwLock,
    },
    thread,
    time::Duration,
};

use tracing::{info, warn};

use crate::error::EngineError;
use crate::row::Row;
use crate::task::PartitionId;

/// Una partición que puede vivir en memoria o derramada en disco.
struct PartitionEntry {
    partition_id: PartitionId,
    state: Mutex<EntryState>,
}

#[derive(Default)]
struct EntryState {
    in_mem: Option<Vec<Row>>,
    on_disk: Option<PathBuf>,
    size_bytes: i64,
}

/// Almacén de particiones acotado en memoria, con spill transparente a
/// disco cuando el total supera `max_memory`. Un lock de cache protege
/// el mapa de entradas; un lock por entrada protege su contenido; la
/// contabilidad de memoria es atómica (delta en cada `put`).
///
/// Es un handle clonable: todos los clones comparten el mismo almacén,
/// y el spill corre en un hilo de fondo.
#[derive(Clone)]
pub struct PartitionCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    entries: RwLock<HashMap<PartitionId, Arc<PartitionEntry>>>,
    mem_bytes: AtomicI64,
    max_memory: i64,
    dir: PathBuf,
}

impl PartitionCache {
    pub fn new(dir: impl AsRef<Path>, max_memory: i64) -> Result<Self, EngineError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| {
            EngineError::Persistence(format!(
                "no se pudo crear el directorio de cache {}: {e}",
                dir.display()
            ))
        })?;
        Ok(Self {
            inner: Arc::new(CacheInner {
                entries: RwLock::new(HashMap::new()),
                mem_bytes: AtomicI64::new(0),
                max_memory,
                dir,
            }),
        })
    }

    /// Crea el slot vacío de una partición. Idempotente: si ya existe,
    /// no toca su contenido.
    pub fn register(&self, partition_id: PartitionId) {
        let mut entries = self.inner.entries.write().unwrap();
        entries.entry(partition_id).or_insert_with(|| {
            Arc::new(PartitionEntry {
                partition_id,
                state: Mutex::new(EntryState {
                    in_mem: Some(Vec::new()),
                    ..EntryState::default()
                }),
            })
        });
    }

    /// Reemplaza el contenido de la partición. Si el total de memoria
    /// supera el presupuesto, agenda un spill asíncrono.
    pub fn put(&self, partition_id: PartitionId, rows: Vec<Row>) {
        self.inner.put_rows(partition_id, rows);
        if self.inner.over_budget() {
            self.schedule_spill();
        }
    }

    /// Devuelve una copia defensiva del contenido. Si la partición está
    /// en disco la recarga, la reinstala en memoria y puede a su vez
    /// disparar el spill de otras particiones.
    pub fn get(&self, partition_id: PartitionId) -> Option<Vec<Row>> {
        let (rows, reloaded) = self.inner.get_rows(partition_id)?;
        if reloaded && self.inner.over_budget() {
            self.schedule_spill();
        }
        Some(rows)
    }

    pub fn spill_partition(&self, partition_id: PartitionId) -> Result<(), EngineError> {
        self.inner.spill_partition(partition_id)
    }

    pub fn spill_if_needed(&self) {
        self.inner.spill_if_needed();
    }

    pub fn mem_bytes(&self) -> i64 {
        self.inner.mem_bytes.load(Ordering::SeqCst)
    }

    pub fn max_memory(&self) -> i64 {
        self.inner.max_memory
    }

    pub fn contains(&self, partition_id: PartitionId) -> bool {
        self.inner
            .entries
            .read()
            .unwrap()
            .contains_key(&partition_id)
    }

    pub fn is_in_memory(&self, partition_id: PartitionId) -> bool {
        match self.inner.entry(partition_id) {
            Some(entry) => entry.state.lock().unwrap().in_mem.is_some(),
            None => false,
        }
    }

    fn schedule_spill(&self) {
        let inner = Arc::clone(&self.inner);
        thread::spawn(move || inner.spill_if_needed());
    }
}

impl CacheInner {
    fn entry(&self, partition_id: PartitionId) -> Option<Arc<PartitionEntry>> {
        self.entries.read().unwrap().get(&partition_id).cloned()
    }

    fn entry_or_insert(&self, partition_id: PartitionId) -> Arc<PartitionEntry> {
        let mut entries = self.entries.write().unwrap();
        entries
            .entry(partition_id)
            .or_insert_with(|| {
                Arc::new(PartitionEntry {
                    partition_id,
                    state: Mutex::new(EntryState::default()),
                })
            })
            .clone()
    }

    fn over_budget(&self) -> bool {
        self.mem_bytes.load(Ordering::SeqCst) > self.max_memory
    }

    fn put_rows(&self, partition_id: PartitionId, rows: Vec<Row>) {
        let size = estimate_size(&rows);
        let entry = self.entry_or_insert(partition_id);

        let mut state = entry.state.lock().unwrap();
        let prev = state.size_bytes;
        state.in_mem = Some(rows);
        state.size_bytes = size;
        state.on_disk = None;
        self.mem_bytes.fetch_add(size - prev, Ordering::SeqCst);
    }

    /// Devuelve las filas y si hubo que recargarlas desde disco.
    fn get_rows(&self, partition_id: PartitionId) -> Option<(Vec<Row>, bool)> {
        let Some(entry) = self.entry(partition_id) else {
            warn!("partición {partition_id} no está en la cache");
            return None;
        };

        let mut state = entry.state.lock().unwrap();
        if let Some(rows) = &state.in_mem {
            return Some((rows.clone(), false));
        }

        let Some(path) = state.on_disk.clone() else {
            warn!("partición {partition_id} sin datos en memoria ni en disco");
            return None;
        };

        let rows = match load_from_disk(&path) {
            Ok(rows) => rows,
            Err(e) => {
                warn!(
                    "no se pudo recargar la partición {partition_id} desde {}: {e}",
                    path.display()
                );
                return None;
            }
        };

        let size = estimate_size(&rows);
        state.in_mem = Some(rows.clone());
        state.size_bytes = size;
        state.on_disk = None;
        self.mem_bytes.fetch_add(size, Ordering::SeqCst);

        Some((rows, true))
    }

    /// Serializa la partición a `partition_<id>.bin` y libera su memoria.
    /// El lock de entrada serializa el spill contra cualquier `get`.
    fn spill_partition(&self, partition_id: PartitionId) -> Result<(), EngineError> {
        let Some(entry) = self.entry(partition_id) else {
            return Ok(());
        };

        let mut state = entry.state.lock().unwrap();
        let Some(rows) = &state.in_mem else {
            // ya está en disco o vacía
            return Ok(());
        };

        let path = self.dir.join(format!("partition_{partition_id}.bin"));
        let bytes = serde_json::to_vec(rows).map_err(|e| {
            EngineError::Persistence(format!("codificando partición {partition_id}: {e}"))
        })?;
        fs::write(&path, bytes).map_err(|e| {
            EngineError::Persistence(format!("escribiendo {}: {e}", path.display()))
        })?;

        let released = state.size_bytes;
        state.in_mem = None;
        state.size_bytes = 0;
        state.on_disk = Some(path);
        self.mem_bytes.fetch_add(-released, Ordering::SeqCst);
        info!("partición {partition_id} derramada a disco ({released} bytes liberados)");
        Ok(())
    }

    /// Política de desalojo: derramar primero la partición más grande
    /// en memoria, hasta bajar del presupuesto. Si ya está todo en
    /// disco, avisa y corta (de disco no se desaloja).
    fn spill_if_needed(&self) {
        while self.over_budget() {
            let mut candidates: Vec<(PartitionId, i64)> = {
                let entries = self.entries.read().unwrap();
                entries
                    .values()
                    .filter_map(|entry| {
                        let state = entry.state.lock().unwrap();
                        state
                            .in_mem
                            .as_ref()
                            .map(|_| (entry.partition_id, state.size_bytes))
                    })
                    .collect()
            };
            candidates.sort_by(|a, b| b.1.cmp(&a.1));

            let mut spilled_any = false;
            for (partition_id, _) in candidates {
                match self.spill_partition(partition_id) {
                    Ok(()) => {
                        spilled_any = true;
                        break;
                    }
                    Err(e) => warn!("fallo el spill de la partición {partition_id}: {e}"),
                }
            }

            if !spilled_any {
                warn!("no se puede bajar la memoria: todas las particiones ya están en disco");
                break;
            }

            // pausa corta entre rondas para no girar en seco
            thread::sleep(Duration::from_millis(10));
        }
    }
}

fn load_from_disk(path: &Path) -> Result<Vec<Row>, EngineError> {
    let bytes = fs::read(path)
        .map_err(|e| EngineError::Persistence(format!("leyendo {}: {e}", path.display())))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| EngineError::Persistence(format!("decodificando {}: {e}", path.display())))
}

/// Contenido crudo de una fila: largo en bytes de clave y valor en su
/// forma string, más 32 bytes de sobrecosto cuando el valor no es string.
fn raw_row_size(row: &Row) -> i64 {
    let mut size = row.key_string().len() as i64 + row.value_string().len() as i64;
    if !row.value.is_string() {
        size += 32;
    }
    size
}

/// Estimación del tamaño en memoria: codifica una muestra de hasta 10
/// filas, calcula el ratio codificado/crudo y lo aplica al total.
fn estimate_size(rows: &[Row]) -> i64 {
    if rows.is_empty() {
        return 0;
    }

    let sample = &rows[..rows.len().min(10)];
    let sample_raw: i64 = sample.iter().map(raw_row_size).sum();
    let total_raw: i64 = rows.iter().map(raw_row_size).sum();

    let encoded = match serde_json::to_vec(sample) {
        Ok(bytes) => bytes.len() as i64,
        Err(_) => return total_raw * 3 / 2,
    };

    if sample_raw > 0 {
        (total_raw as f64 * encoded as f64 / sample_raw as f64) as i64
    } else {
        total_raw * 3 / 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn temp_cache(sub: &str, max_memory: i64) -> PartitionCache {
        let dir = env::temp_dir().join("cache_tests").join(sub);
        let _ = fs::remove_dir_all(&dir);
        PartitionCache::new(&dir, max_memory).unwrap()
    }

    fn rows_of(prefix: &str, count: usize, width: usize) -> Vec<Row> {
        (0..count)
            .map(|i| Row::new(i as u64, format!("{prefix}{}", "x".repeat(width))))
            .collect()
    }

    #[test]
    fn put_y_get_devuelven_el_mismo_contenido() {
        let cache = temp_cache("put_get", 1024 * 1024);
        let rows = rows_of("a", 5, 10);

        cache.put(1, rows.clone());
        assert_eq!(cache.get(1), Some(rows));
        assert_eq!(cache.get(99), None);
    }

    #[test]
    fn register_es_idempotente_y_no_pisa_contenido() {
        let cache = temp_cache("register", 1024 * 1024);
        cache.register(1);
        assert_eq!(cache.get(1), Some(Vec::new()));

        let rows = rows_of("b", 3, 5);
        cache.put(1, rows.clone());
        cache.register(1);
        assert_eq!(cache.get(1), Some(rows));
    }

    #[test]
    fn get_devuelve_copia_defensiva() {
        let cache = temp_cache("copia", 1024 * 1024);
        cache.put(1, rows_of("c", 2, 4));

        let mut copy = cache.get(1).unwrap();
        copy.clear();
        assert_eq!(cache.get(1).unwrap().len(), 2);
    }

    #[test]
    fn spill_y_recarga_preservan_igualdad() {
        let cache = temp_cache("spill_reload", 1024 * 1024);
        let rows = rows_of("d", 10, 20);
        cache.put(7, rows.clone());

        cache.spill_partition(7).unwrap();
        assert!(!cache.is_in_memory(7));
        assert_eq!(cache.mem_bytes(), 0);

        // get recarga desde disco y reinstala en memoria
        assert_eq!(cache.get(7), Some(rows));
        assert!(cache.is_in_memory(7));
        assert!(cache.mem_bytes() > 0);
    }

    #[test]
    fn spill_if_needed_desaloja_hasta_cumplir_el_presupuesto() {
        // tres particiones de ~800 bytes con presupuesto de 1 KiB:
        // al asentarse, al menos dos tienen que quedar en disco
        let cache = temp_cache("presupuesto", 1024);
        let p1 = rows_of("p1-", 4, 190);
        let p2 = rows_of("p2-", 4, 190);
        let p3 = rows_of("p3-", 4, 190);

        cache.put(1, p1.clone());
        cache.put(2, p2.clone());
        cache.put(3, p3.clone());
        cache.spill_if_needed();

        assert!(cache.mem_bytes() <= cache.max_memory());
        let on_disk = [1, 2, 3]
            .iter()
            .filter(|id| !cache.is_in_memory(**id))
            .count();
        assert!(on_disk >= 2, "solo {on_disk} particiones en disco");

        // el contenido sobrevive al spill
        assert_eq!(cache.get(1), Some(p1));
        assert_eq!(cache.get(2), Some(p2));
        assert_eq!(cache.get(3), Some(p3));
    }

    #[test]
    fn put_actualiza_la_contabilidad_por_diferencia() {
        let cache = temp_cache("delta", 1024 * 1024);
        cache.put(1, rows_of("x", 10, 50));
        let first = cache.mem_bytes();
        assert!(first > 0);

        // reemplazar con menos contenido baja el total
        cache.put(1, rows_of("x", 2, 5));
        assert!(cache.mem_bytes() < first);

        // y vaciar la partición lo deja en cero
        cache.put(1, Vec::new());
        assert_eq!(cache.mem_bytes(), 0);
    }

    #[test]
    fn estimate_size_escala_por_ratio_de_codificacion() {
        assert_eq!(estimate_size(&[]), 0);

        let rows = rows_of("e", 30, 40);
        let est = estimate_size(&rows);
        let raw: i64 = rows.iter().map(raw_row_size).sum();
        // el JSON codificado siempre pesa más que el contenido crudo
        assert!(est > raw);
    }

    #[test]
    fn raw_row_size_suma_overhead_para_valores_no_string() {
        let string_row = Row::new("k", "vvvv");
        let number_row = Row::new("k", 4444);
        assert_eq!(raw_row_size(&string_row), 5);
        assert_eq!(raw_row_size(&number_row), 1 + 4 + 32);
    }
}
