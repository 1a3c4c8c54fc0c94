use tracing::info;

use crate::clock::Clock;
use crate::domain::resource::{Resource, ResourceId};
use crate::domain::workflow::{ordered, validate_workflow, WorkflowStep};
use crate::errors::ReservationError;
use crate::notify::Notifier;
use crate::store::ReservationStore;

use super::ReservationEngine;

impl<S, N, C> ReservationEngine<S, N, C>
where
    S: ReservationStore,
    N: Notifier,
    C: Clock,
{
    pub async fn register_resource(
        &self,
        name: &str,
        category: &str,
    ) -> Result<Resource, ReservationError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ReservationError::validation("resource name is required"));
        }

        let mut tx = self.store.begin().await?;
        let resource = tx.insert_resource(name, category.trim()).await?;
        tx.commit().await?;

        info!(
            event_name = "resource.registered",
            resource_id = resource.id.0,
            category = %resource.category,
            "resource registered"
        );
        Ok(resource)
    }

    /// Ordered approval chain of a resource; empty when none is configured.
    pub async fn get_workflow(
        &self,
        resource_id: ResourceId,
    ) -> Result<Vec<WorkflowStep>, ReservationError> {
        if self.store.resource(resource_id).await?.is_none() {
            return Err(ReservationError::NotFound(format!("resource {resource_id}")));
        }
        Ok(ordered(self.store.workflow(resource_id).await?))
    }

    /// Replaces the whole approval chain in one transaction. Orders are stored as given.
    pub async fn set_workflow(
        &self,
        resource_id: ResourceId,
        steps: Vec<WorkflowStep>,
    ) -> Result<Vec<WorkflowStep>, ReservationError> {
        validate_workflow(&steps).map_err(ReservationError::Validation)?;
        let steps = ordered(steps);

        let mut tx = self.store.begin().await?;
        if tx.find_resource(resource_id).await?.is_none() {
            return Err(ReservationError::NotFound(format!("resource {resource_id}")));
        }
        tx.replace_workflow(resource_id, &steps).await?;
        tx.commit().await?;

        info!(
            event_name = "workflow.replaced",
            resource_id = resource_id.0,
            steps = steps.len(),
            "approval workflow replaced"
        );
        Ok(steps)
    }

    /// Removes every step; the resource stops accepting reservations until a new chain is set.
    pub async fn clear_workflow(&self, resource_id: ResourceId) -> Result<(), ReservationError> {
        let mut tx = self.store.begin().await?;
        if tx.find_resource(resource_id).await?.is_none() {
            return Err(ReservationError::NotFound(format!("resource {resource_id}")));
        }
        tx.replace_workflow(resource_id, &[]).await?;
        tx.commit().await?;

        info!(event_name = "workflow.cleared", resource_id = resource_id.0, "approval workflow cleared");
        Ok(())
    }
}
