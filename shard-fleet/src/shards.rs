use serde::Deserialize;
use serde::Serialize;

use crate::FleetError;

/// The shards a fleet manages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ShardIds {
    /// Exactly these shards.
    List(Vec<u32>),
    /// Every shard from `start` to `end`, both included.
    Range { start: u32, end: u32 },
}

impl ShardIds {
    pub fn range(start: u32, end: u32) -> Self {
        Self::Range { start, end }
    }

    /// The ids in ascending order, without duplicates.
    pub fn resolve(&self) -> Result<Vec<u32>, FleetError> {
        match self {
            Self::List(ids) if ids.is_empty() => Err(FleetError::Configuration(
                "shard id list is empty".to_string(),
            )),
            Self::List(ids) => {
                let mut ids = ids.clone();
                ids.sort_unstable();
                ids.dedup();
                Ok(ids)
            }
            Self::Range { start, end } if end < start => Err(FleetError::Configuration(format!(
                "shard id range ends ({end}) before it starts ({start})"
            ))),
            Self::Range { start, end } => Ok((*start..=*end).collect()),
        }
    }
}

impl From<Vec<u32>> for ShardIds {
    fn from(ids: Vec<u32>) -> Self {
        Self::List(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_are_sorted_and_deduplicated() {
        assert_eq!(
            ShardIds::from(vec![9, 5, 5, 7]).resolve().unwrap(),
            vec![5, 7, 9]
        );
    }

    #[test]
    fn ranges_are_inclusive() {
        assert_eq!(ShardIds::range(3, 6).resolve().unwrap(), vec![3, 4, 5, 6]);
        assert_eq!(ShardIds::range(4, 4).resolve().unwrap(), vec![4]);
    }

    #[test]
    fn impossible_sets_are_configuration_errors() {
        assert!(matches!(
            ShardIds::range(6, 3).resolve(),
            Err(FleetError::Configuration(_))
        ));
        assert!(matches!(
            ShardIds::List(vec![]).resolve(),
            Err(FleetError::Configuration(_))
        ));
    }

    #[test]
    fn both_shapes_deserialize() {
        let list: ShardIds = serde_json::from_str("[1, 3, 7]").unwrap();
        let range: ShardIds = serde_json::from_str(r#"{"start": 3, "end": 6}"#).unwrap();

        assert_eq!(list, ShardIds::List(vec![1, 3, 7]));
        assert_eq!(range, ShardIds::range(3, 6));
    }
}
