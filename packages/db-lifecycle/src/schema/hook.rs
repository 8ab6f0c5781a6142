use std::fmt;

use tracing::debug;

use crate::infra::db::DbHandle;
use crate::schema::SchemaModel;

/// Contributes schema objects before synchronization.
///
/// Participants run one at a time, in registration order, and may inspect
/// the handle (dialect, backend) while writing into the model.
pub trait SchemaParticipant: Send + Sync {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn extend_schema(&self, db: &DbHandle, dm: &mut SchemaModel);
}

impl<F> SchemaParticipant for F
where
    F: Fn(&DbHandle, &mut SchemaModel) + Send + Sync,
{
    fn extend_schema(&self, db: &DbHandle, dm: &mut SchemaModel) {
        self(db, dm)
    }
}

#[derive(Default)]
pub struct SchemaHook {
    participants: Vec<Box<dyn SchemaParticipant>>,
}

impl SchemaHook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<P: SchemaParticipant + 'static>(&mut self, participant: P) {
        self.participants.push(Box::new(participant));
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.participants.iter().map(|p| p.name())
    }

    /// Run every participant to completion, in order.
    pub fn broadcast(&self, db: &DbHandle, dm: &mut SchemaModel) {
        for (position, participant) in self.participants.iter().enumerate() {
            let before = dm.len();
            participant.extend_schema(db, dm);
            debug!(
                "schema_hook=participant position={} name={} objects_before={} objects_after={}",
                position,
                participant.name(),
                before,
                dm.len()
            );
        }
    }
}

impl fmt::Debug for SchemaHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
