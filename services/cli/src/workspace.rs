use std::fs;
use std::path::Path;
use std::sync::Arc;

use academic_lifecycle::academics::{
    AcademicDataset, AcademicRecordService, InMemoryAcademicStore, PromotionEngine,
    ResultEvaluator, TransferEngine,
};
use academic_lifecycle::audit::AuditSink;
use academic_lifecycle::clock::Clock;
use academic_lifecycle::config::{AppConfig, TransferPolicy};
use academic_lifecycle::rules::{
    default_rules, AcademicRule, InMemoryRuleStore, RuleConfiguration, RuleEngine, TtlRuleCache,
};
use academic_lifecycle::AppError;
use serde::{Deserialize, Serialize};
use tracing::info;

/// On-disk JSON document holding rules, configurations and every academic table.
#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct DatasetFile {
    #[serde(default)]
    pub(crate) rules: Vec<AcademicRule>,
    #[serde(default)]
    pub(crate) configurations: Vec<RuleConfiguration>,
    #[serde(flatten)]
    pub(crate) academics: AcademicDataset,
}

impl DatasetFile {
    /// A missing file is an empty dataset seeded with the default rule catalog later on.
    pub(crate) fn read(path: &Path) -> Result<Self, AppError> {
        if !path.exists() {
            info!(path = %path.display(), "dataset not found, starting empty");
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub(crate) fn write(&self, path: &Path) -> Result<(), AppError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        info!(
            path = %path.display(),
            students = self.academics.students.len(),
            records = self.academics.records.len(),
            "dataset saved"
        );
        Ok(())
    }
}

/// Engines wired over one in-memory copy of a dataset.
pub(crate) struct Workspace<A> {
    rule_store: Arc<InMemoryRuleStore>,
    pub(crate) store: Arc<InMemoryAcademicStore>,
    pub(crate) audit: Arc<A>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) rules: Arc<RuleEngine>,
    transfer_policy: TransferPolicy,
}

impl<A> Workspace<A>
where
    A: AuditSink + 'static,
{
    pub(crate) fn new(
        dataset: DatasetFile,
        config: &AppConfig,
        clock: Arc<dyn Clock>,
        audit: Arc<A>,
    ) -> Self {
        let DatasetFile {
            rules,
            configurations,
            academics,
        } = dataset;
        let rules = if rules.is_empty() {
            default_rules()
        } else {
            rules
        };

        let rule_store = Arc::new(InMemoryRuleStore::from_parts(rules, configurations));
        let cache = Arc::new(TtlRuleCache::new(config.rules.cache_ttl, clock.clone()));
        let engine = RuleEngine::new(rule_store.clone(), cache, clock.clone(), audit.clone());

        Self {
            rule_store,
            store: Arc::new(InMemoryAcademicStore::from_dataset(academics)),
            audit,
            clock,
            rules: Arc::new(engine),
            transfer_policy: config.transfer.clone(),
        }
    }

    pub(crate) fn snapshot(&self) -> Result<DatasetFile, AppError> {
        let (rules, configurations) = self.rule_store.export()?;
        Ok(DatasetFile {
            rules,
            configurations,
            academics: self.store.dataset()?,
        })
    }

    pub(crate) fn records(&self) -> AcademicRecordService<InMemoryAcademicStore, A> {
        AcademicRecordService::new(self.store.clone(), self.audit.clone(), self.rules.clone())
    }

    pub(crate) fn evaluator(&self) -> ResultEvaluator<InMemoryAcademicStore, A> {
        ResultEvaluator::new(self.store.clone(), self.audit.clone(), self.rules.clone())
    }

    pub(crate) fn promotions(&self) -> PromotionEngine<InMemoryAcademicStore, A> {
        PromotionEngine::new(self.store.clone(), self.audit.clone(), self.rules.clone())
    }

    pub(crate) fn transfers(&self) -> TransferEngine<InMemoryAcademicStore, A> {
        TransferEngine::new(
            self.store.clone(),
            self.audit.clone(),
            self.clock.clone(),
            self.transfer_policy.clone(),
        )
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> AppConfig {
    use academic_lifecycle::config::{AppEnvironment, RuleSettings, TelemetryConfig};

    AppConfig {
        environment: AppEnvironment::Test,
        telemetry: TelemetryConfig {
            log_level: "warn".to_string(),
        },
        rules: RuleSettings::default(),
        transfer: TransferPolicy::default(),
    }
}
