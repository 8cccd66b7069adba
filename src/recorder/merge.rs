use tracing::debug;
use uuid::Uuid;

use super::types::{EntityUpdate, TrackedEntity};

/// Registry after merging, plus the ids whose documents changed.
#[derive(Debug, Clone, PartialEq)]
pub struct Merged<E> {
    /// Updated registry, existing order preserved, new entities appended.
    pub entities: Vec<E>,
    /// Ids of created or updated entities, in first-touch order.
    pub touched: Vec<String>,
}

/// Merge model updates into `existing`.
///
/// Matching is by id, then by exact name/title. Matched entities get only the
/// fields present in the update. Unmatched updates with a usable name/title
/// become new entities with a fresh id; the rest are dropped.
pub fn merge_entities<E: TrackedEntity>(
    existing: &[E],
    updates: Vec<E::Update>,
    round: u32,
) -> Merged<E> {
    let mut entities = existing.to_vec();
    let mut touched: Vec<String> = Vec::new();

    for update in updates {
        let by_id = update
            .id()
            .and_then(|id| entities.iter().position(|e| e.id() == id));
        let index = by_id.or_else(|| {
            update
                .label()
                .and_then(|label| entities.iter().position(|e| e.label() == label))
        });

        let id = match index {
            Some(i) => {
                entities[i].apply(&update, round);
                entities[i].id().to_string()
            }
            None => match E::create(&update, Uuid::new_v4().to_string(), round) {
                Some(entity) => {
                    let id = entity.id().to_string();
                    entities.push(entity);
                    id
                }
                None => {
                    debug!(kind = E::NOUN, "Dropping update without name or title");
                    continue;
                }
            },
        };

        if !touched.contains(&id) {
            touched.push(id);
        }
    }

    Merged { entities, touched }
}
