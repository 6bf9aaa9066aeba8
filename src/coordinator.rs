//! The four coordinators wired to one registry.

use std::sync::Arc;

use crate::config::CoordinatorConfig;
use crate::constraints::{ConstraintViolationResolver, ViolationClassifier};
use crate::leaks::ConnectionLeakMonitor;
use crate::migration::MigrationSafetyCoordinator;
use crate::registry::{ResilienceRegistry, ResilienceStatus};
use crate::store::{
    BackupSink, DeadLetterSink, JsonFileBackup, JsonlDeadLetterSink, LogNotifier, Notifier,
    RecordStore, RestoreRequester,
};
use crate::webhooks::{WebhookHandler, WebhookRetryCoordinator, WebhookRouter};

/// Facade over the constraint resolver, leak monitor, migration coordinator and webhook
/// retry coordinator. They share nothing but the registry.
pub struct ResilienceCoordinator {
    registry: Arc<ResilienceRegistry>,
    constraints: ConstraintViolationResolver,
    leaks: ConnectionLeakMonitor,
    migrations: Option<MigrationSafetyCoordinator>,
    webhooks: WebhookRetryCoordinator,
}

impl ResilienceCoordinator {
    pub fn builder(config: CoordinatorConfig) -> CoordinatorBuilder {
        CoordinatorBuilder::new(config)
    }

    pub fn registry(&self) -> &Arc<ResilienceRegistry> {
        &self.registry
    }

    pub fn constraints(&self) -> &ConstraintViolationResolver {
        &self.constraints
    }

    pub fn leaks(&self) -> &ConnectionLeakMonitor {
        &self.leaks
    }

    /// Present only when a record store was supplied.
    pub fn migrations(&self) -> Option<&MigrationSafetyCoordinator> {
        self.migrations.as_ref()
    }

    pub fn webhooks(&self) -> &WebhookRetryCoordinator {
        &self.webhooks
    }

    /// Aggregate counts across all four record kinds.
    pub fn status(&self) -> ResilienceStatus {
        self.registry.status()
    }

    /// Abort pending webhook retries and release every tracked connection.
    pub fn shutdown(&self) {
        let aborted = self.webhooks.shutdown();
        let released = self.leaks.release_all();
        tracing::info!(
            aborted_retries = aborted,
            released_connections = released,
            "Resilience coordinator stopped"
        );
    }
}

pub struct CoordinatorBuilder {
    config: CoordinatorConfig,
    registry: Option<Arc<ResilienceRegistry>>,
    store: Option<Arc<dyn RecordStore>>,
    backup: Option<Arc<dyn BackupSink>>,
    restorer: Option<Arc<dyn RestoreRequester>>,
    dead_letters: Option<Arc<dyn DeadLetterSink>>,
    notifier: Option<Arc<dyn Notifier>>,
    classifier: Option<Arc<dyn ViolationClassifier>>,
    handler: Option<Arc<dyn WebhookHandler>>,
}

impl CoordinatorBuilder {
    pub fn new(config: CoordinatorConfig) -> Self {
        Self {
            config,
            registry: None,
            store: None,
            backup: None,
            restorer: None,
            dead_letters: None,
            notifier: None,
            classifier: None,
            handler: None,
        }
    }

    pub fn registry(mut self, registry: Arc<ResilienceRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Store used for migration row counts and, unless `backup` is set, for JSON backups.
    pub fn store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn backup(mut self, backup: Arc<dyn BackupSink>) -> Self {
        self.backup = Some(backup);
        self
    }

    pub fn restorer(mut self, restorer: Arc<dyn RestoreRequester>) -> Self {
        self.restorer = Some(restorer);
        self
    }

    pub fn dead_letters(mut self, sink: Arc<dyn DeadLetterSink>) -> Self {
        self.dead_letters = Some(sink);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn classifier(mut self, classifier: Arc<dyn ViolationClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn webhook_router(self, router: WebhookRouter) -> Self {
        self.webhook_handler(Arc::new(router))
    }

    pub fn webhook_handler(mut self, handler: Arc<dyn WebhookHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn build(self) -> ResilienceCoordinator {
        let config = self.config;
        let registry = self.registry.unwrap_or_default();

        let mut constraints =
            ConstraintViolationResolver::new(registry.clone(), config.constraints.clone());
        if let Some(classifier) = self.classifier {
            constraints = constraints.with_classifier(classifier);
        }

        let notifier = self
            .notifier
            .unwrap_or_else(|| Arc::new(LogNotifier) as Arc<dyn Notifier>);
        let leaks = ConnectionLeakMonitor::new(registry.clone(), config.leaks.clone(), notifier);

        let backup = self.backup;
        let restorer = self.restorer;
        let migrations = self.store.map(|store| {
            let backup = backup.unwrap_or_else(|| {
                Arc::new(JsonFileBackup::new(store.clone())) as Arc<dyn BackupSink>
            });
            let coordinator = MigrationSafetyCoordinator::new(
                registry.clone(),
                store,
                backup,
                config.migrations.clone(),
            );
            match restorer {
                Some(r) => coordinator.with_restorer(r),
                None => coordinator,
            }
        });

        let dead_letters = self.dead_letters.unwrap_or_else(|| {
            Arc::new(JsonlDeadLetterSink::new(
                config.webhooks.dead_letter_path.clone(),
            )) as Arc<dyn DeadLetterSink>
        });
        let handler = self
            .handler
            .unwrap_or_else(|| Arc::new(WebhookRouter::new()) as Arc<dyn WebhookHandler>);
        let webhooks = WebhookRetryCoordinator::new(
            registry.clone(),
            handler,
            dead_letters,
            config.webhooks.clone(),
        );

        tracing::debug!(
            migrations_enabled = migrations.is_some(),
            "Resilience coordinator built"
        );

        ResilienceCoordinator {
            registry,
            constraints,
            leaks,
            migrations,
            webhooks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryDeadLetterSink, MemoryStore};

    #[test]
    fn test_migrations_need_a_store() {
        let without = ResilienceCoordinator::builder(CoordinatorConfig::default())
            .dead_letters(Arc::new(MemoryDeadLetterSink::new()))
            .build();
        assert!(without.migrations().is_none());

        let with = ResilienceCoordinator::builder(CoordinatorConfig::default())
            .store(Arc::new(MemoryStore::new()))
            .dead_letters(Arc::new(MemoryDeadLetterSink::new()))
            .build();
        assert!(with.migrations().is_some());
        assert_eq!(with.status(), ResilienceStatus::default());
    }

    #[test]
    fn test_shared_registry() {
        let registry = Arc::new(ResilienceRegistry::new());
        let c = ResilienceCoordinator::builder(CoordinatorConfig::default())
            .registry(registry.clone())
            .build();
        assert!(Arc::ptr_eq(c.registry(), &registry));
    }
}
