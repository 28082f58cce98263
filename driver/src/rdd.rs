use common::job::RddId;
use common::task::PartitionId;
use common::transform::Transformation;

use crate::state::DriverInner;

/// Nodo del grafo de lineage. Los padres se referencian por ID dentro
/// del registro del driver, nunca por punteros: recorrer el lineage es
/// caminar IDs en un arena.
#[derive(Debug, Clone)]
pub struct RddNode {
    pub id: RddId,
    pub parent: Option<RddId>,
    pub transformations: Vec<Transformation>,
    pub num_partitions: usize,
    pub partitions: Vec<PartitionId>,
}

impl DriverInner {
    /// Registra un RDD fuente (sin padre) sobre particiones ya asignadas.
    pub fn register_source_rdd(&mut self, partitions: Vec<PartitionId>) -> RddId {
        let id = self.next_rdd_id();
        self.rdds.insert(
            id,
            RddNode {
                id,
                parent: None,
                transformations: Vec::new(),
                num_partitions: partitions.len(),
                partitions,
            },
        );
        id
    }

    /// Registra un RDD derivado con una transformación angosta:
    /// hereda las particiones del padre, sin mover datos.
    pub fn derive_rdd(&mut self, parent: RddId, transformation: Transformation) -> Option<RddId> {
        let (num_partitions, partitions) = {
            let node = self.rdds.get(&parent)?;
            (node.num_partitions, node.partitions.clone())
        };

        let id = self.next_rdd_id();
        self.rdds.insert(
            id,
            RddNode {
                id,
                parent: Some(parent),
                transformations: vec![transformation],
                num_partitions,
                partitions,
            },
        );
        Some(id)
    }

    /// Aplana el lineage en un pipeline raíz→hoja: las transformaciones
    /// de cada ancestro van por delante de las de sus descendientes.
    pub fn compile_pipeline(&self, rdd_id: RddId) -> Option<Vec<Transformation>> {
        let mut pipeline: Vec<Transformation> = Vec::new();
        let mut current = Some(rdd_id);

        while let Some(id) = current {
            let node = self.rdds.get(&id)?;
            let mut combined = node.transformations.clone();
            combined.extend(pipeline);
            pipeline = combined;
            current = node.parent;
        }

        Some(pipeline)
    }
}

/// Parte los elementos en N trozos del mismo tamaño; el último absorbe
/// el resto de la división entera.
pub fn split_into_chunks<T: Clone>(items: &[T], num_partitions: usize) -> Vec<Vec<T>> {
    let n = num_partitions.max(1);
    let chunk_size = items.len() / n;

    let mut chunks = Vec::with_capacity(n);
    for i in 0..n {
        let start = i * chunk_size;
        let end = if i == n - 1 {
            items.len()
        } else {
            start + chunk_size
        };
        chunks.push(items[start..end].to_vec());
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::transform::TransformOp;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn compile_pipeline_aplana_raiz_a_hoja() {
        let mut inner = DriverInner::new();
        let source = inner.register_source_rdd(vec![0, 1]);
        let filtered = inner
            .derive_rdd(source, Transformation::new(TransformOp::Filter, "IsLong"))
            .unwrap();
        let mapped = inner
            .derive_rdd(filtered, Transformation::new(TransformOp::Map, "ToUpper"))
            .unwrap();

        // compile(map(filter(read))) = [filter, map]
        let pipeline = inner.compile_pipeline(mapped).unwrap();
        assert_eq!(pipeline.len(), 2);
        assert_eq!(pipeline[0].op, TransformOp::Filter);
        assert_eq!(pipeline[1].op, TransformOp::Map);
    }

    #[test]
    fn derive_rdd_hereda_particiones_del_padre() {
        let mut inner = DriverInner::new();
        let source = inner.register_source_rdd(vec![3, 5, 9]);
        let derived = inner
            .derive_rdd(source, Transformation::new(TransformOp::Map, "ToUpper"))
            .unwrap();

        let node = &inner.rdds[&derived];
        assert_eq!(node.partitions, vec![3, 5, 9]);
        assert_eq!(node.num_partitions, 3);
        assert_eq!(node.parent, Some(source));
    }

    #[test]
    fn derive_rdd_sin_padre_registrado_devuelve_none() {
        let mut inner = DriverInner::new();
        assert!(inner
            .derive_rdd(99, Transformation::new(TransformOp::Map, "ToUpper"))
            .is_none());
    }

    #[test]
    fn split_into_chunks_reparte_parejo_y_el_ultimo_absorbe_el_resto() {
        let lines = strings(&["a", "b", "c", "d", "e"]);
        let chunks = split_into_chunks(&lines, 2);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], strings(&["a", "b"]));
        assert_eq!(chunks[1], strings(&["c", "d", "e"]));
    }

    #[test]
    fn split_into_chunks_con_menos_lineas_que_particiones() {
        let lines = strings(&["a", "b"]);
        let chunks = split_into_chunks(&lines, 4);
        assert_eq!(chunks.len(), 4);
        assert!(chunks[0].is_empty());
        assert!(chunks[1].is_empty());
        assert!(chunks[2].is_empty());
        assert_eq!(chunks[3], strings(&["a", "b"]));
    }

    #[test]
    fn split_into_chunks_exacto() {
        let lines = strings(&["a", "b", "c", "d", "e", "f"]);
        let chunks = split_into_chunks(&lines, 3);
        assert_eq!(chunks.iter().map(Vec::len).collect::<Vec<_>>(), [2, 2, 2]);
    }
}
