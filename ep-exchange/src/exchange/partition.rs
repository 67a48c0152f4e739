use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use ep_data::{DataType, Dataset};
use moka::sync::Cache;
use parking_lot::Mutex;

use crate::{Encoder, ExchangeError, HashRing, NodeAddr};

/// The maximum number of ring positions the partitioner remembers the owner of.
pub const ENCODER_CACHE_CAPACITY: u64 = 100_000;

/// Routes rows to nodes by the consistent hash of their key.
pub(crate) struct Partitioner {
    key_columns: Vec<usize>,
    ring: HashRing,
    routes: HashMap<NodeAddr, usize>,
    cache: Cache<u64, Arc<Encoder>>,
    schema: Mutex<Option<Vec<DataType>>>,
}

impl Partitioner {
    pub(crate) fn new(key_columns: Vec<usize>, nodes: &[NodeAddr]) -> Self {
        let routes = nodes
            .iter()
            .enumerate()
            .map(|(index, node)| (node.clone(), index))
            .collect();

        Self {
            key_columns,
            ring: HashRing::new(nodes.iter().cloned()),
            routes,
            cache: Cache::new(ENCODER_CACHE_CAPACITY),
            schema: Mutex::new(None),
        }
    }

    pub(crate) fn ring(&self) -> &HashRing {
        &self.ring
    }

    /// The encoder of the node owning the given key.
    ///
    /// Owners are cached by ring position.
    pub(crate) fn encoder_for(
        &self,
        key: &str,
        encoders: &[Arc<Encoder>],
    ) -> Result<Arc<Encoder>, ExchangeError> {
        let position = HashRing::position(key.as_bytes());
        if let Some(encoder) = self.cache.get(&position) {
            return Ok(encoder);
        }

        let encoder = self
            .ring
            .owner_at(position)
            .and_then(|owner| self.routes.get(owner))
            .and_then(|&index| encoders.get(index))
            .cloned()
            .ok_or_else(|| ExchangeError::NoPartitionOwner {
                key: key.to_string(),
            })?;

        self.cache.insert(position, encoder.clone());
        Ok(encoder)
    }

    /// Checks the batch against the schema of the exchange.
    ///
    /// The first batch with columns sets the schema every later batch must
    /// match.
    pub(crate) fn check_schema(&self, batch: &Dataset) -> Result<(), ExchangeError> {
        if batch.width() == 0 {
            return Err(ExchangeError::Unprimed);
        }

        if let Some(&index) = self.key_columns.iter().find(|&&index| index >= batch.width()) {
            return Err(ExchangeError::KeyColumnOutOfRange {
                index,
                width: batch.width(),
            });
        }

        let types = batch.types();
        let mut schema = self.schema.lock();
        match schema.as_ref() {
            None => {
                *schema = Some(types);
                Ok(())
            },
            Some(expected) if expected == &types => Ok(()),
            Some(expected) => Err(ExchangeError::SchemaMismatch {
                expected: expected.clone(),
                actual: types,
            }),
        }
    }

    /// Groups the rows of a batch by the encoder they are routed to.
    ///
    /// Groups are ordered by the position of the node in the topology, rows
    /// keep their relative order within a group.
    pub(crate) fn group_rows(
        &self,
        batch: &Dataset,
        encoders: &[Arc<Encoder>],
    ) -> Result<Vec<(Arc<Encoder>, Vec<usize>)>, ExchangeError> {
        let all_columns;
        let key_columns = if self.key_columns.is_empty() {
            all_columns = (0..batch.width()).collect::<Vec<_>>();
            &all_columns
        } else {
            &self.key_columns
        };

        let mut groups: BTreeMap<usize, (Arc<Encoder>, Vec<usize>)> = BTreeMap::new();
        for row in 0..batch.len() {
            let key = batch.row_key(key_columns, row)?;
            let encoder = self.encoder_for(&key, encoders)?;
            groups
                .entry(encoder.index())
                .or_insert_with(|| (encoder.clone(), Vec::new()))
                .1
                .push(row);
        }

        Ok(groups.into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use ep_data::Column;

    use super::*;
    use crate::{Connection, ExchangeStatistics};

    fn nodes() -> Vec<NodeAddr> {
        vec!["a:1".to_string(), "b:1".to_string(), "c:1".to_string()]
    }

    fn encoders(nodes: &[NodeAddr]) -> Vec<Arc<Encoder>> {
        let (tx, _rx) = flume::unbounded();
        nodes
            .iter()
            .enumerate()
            .map(|(index, node)| {
                let connection = Connection::short_circuit(node.clone(), tx.clone());
                Arc::new(Encoder::new(index, connection, ExchangeStatistics::default()))
            })
            .collect()
    }

    #[test]
    fn test_encoder_for_follows_the_ring() {
        let nodes = nodes();
        let encoders = encoders(&nodes);
        let partitioner = Partitioner::new(vec![0], &nodes);

        for i in 0..500 {
            let key = format!("key-{i}");
            let encoder = partitioner.encoder_for(&key, &encoders).unwrap();
            let owner = partitioner.ring().get(key.as_bytes()).unwrap();
            assert_eq!(encoder.route(), owner.as_str());
            assert!(Arc::ptr_eq(
                &encoder,
                &partitioner.encoder_for(&key, &encoders).unwrap()
            ));
        }
    }

    #[test]
    fn test_encoder_for_without_owner() {
        let nodes = nodes();
        let partitioner = Partitioner::new(vec![0], &nodes);
        assert!(matches!(
            partitioner.encoder_for("key-1", &[]),
            Err(ExchangeError::NoPartitionOwner { ref key }) if key == "key-1"
        ));

        let empty = Partitioner::new(vec![0], &[]);
        let err = empty
            .encoder_for("key-1", &encoders(&nodes))
            .err()
            .expect("Empty ring has no owners");
        assert_eq!(err.to_string(), "No node owns partition key \"key-1\"");
    }

    #[test]
    fn test_schema_checks() {
        let partitioner = Partitioner::new(vec![1], &nodes());

        assert!(matches!(
            partitioner.check_schema(&Dataset::nulls(3)),
            Err(ExchangeError::Unprimed)
        ));

        let narrow = Dataset::new(vec![Column::texts(["a"])]).unwrap();
        assert!(matches!(
            partitioner.check_schema(&narrow),
            Err(ExchangeError::KeyColumnOutOfRange { index: 1, width: 1 })
        ));

        let batch = Dataset::new(vec![Column::texts(["a"]), Column::integers(vec![1])]).unwrap();
        partitioner.check_schema(&batch).expect("First batch primes the schema");
        partitioner.check_schema(&batch).expect("Same schema is accepted");

        let other = Dataset::new(vec![Column::integers(vec![1]), Column::integers(vec![1])]).unwrap();
        assert!(matches!(
            partitioner.check_schema(&other),
            Err(ExchangeError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn test_group_rows() {
        let nodes = nodes();
        let encoders = encoders(&nodes);
        let partitioner = Partitioner::new(Vec::new(), &nodes);

        let keys = (0..200).map(|i| format!("key-{}", i % 50)).collect::<Vec<_>>();
        let batch = Dataset::new(vec![Column::texts(keys.clone())]).unwrap();
        let groups = partitioner.group_rows(&batch, &encoders).unwrap();

        let mut total = 0;
        let mut last_index = None;
        for (encoder, rows) in groups {
            assert!(last_index < Some(encoder.index()), "Groups are ordered by node");
            last_index = Some(encoder.index());

            for row in rows {
                let owner = partitioner.ring().get(keys[row].as_bytes()).unwrap();
                assert_eq!(encoder.route(), owner.as_str());
                total += 1;
            }
        }
        assert_eq!(total, 200);
    }
}
