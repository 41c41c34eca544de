use std::collections::HashMap;

use serde_json::Value;

use crate::{Result, ScrapeflowError, model::ActionConfig};

use super::actions::*;

/// Constructor turning node parameters into an action.
pub type ActionFactory = fn(Value) -> Result<Box<dyn Action>>;

/// Generic [`ActionFactory`] for any [`Action`] type.
pub fn factory<A: Action + 'static>(params: Value) -> Result<Box<dyn Action>> {
    Ok(Box::new(A::create(params)?))
}

/// Load-time table mapping a kind id to its constructor.
#[derive(Clone)]
pub struct Registry {
    factories: HashMap<String, ActionFactory>,
}

impl Default for Registry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry
            .register(ActionType::Wrapper, factory::<WrapperAction>)
            .register(ActionType::If, factory::<IfAction>)
            .register(ActionType::ForEach, factory::<ForEachAction>)
            .register(ActionType::Repeat, factory::<RepeatAction>)
            .register(ActionType::ErrorBoundary, factory::<ErrorBoundaryAction>)
            .register(ActionType::Eval, factory::<EvalAction>)
            .register(ActionType::Log, factory::<LogAction>)
            .register(ActionType::LogStep, factory::<LogStepAction>)
            .register(ActionType::LogProgress, factory::<LogProgressAction>)
            .register(ActionType::RequestJson, factory::<RequestJsonAction>)
            .register(ActionType::RequestPage, factory::<RequestPageAction>)
            .register(ActionType::RequestGraphql, factory::<RequestGraphqlAction>)
            .register(ActionType::RequestBrowser, factory::<RequestBrowserAction>)
            .register(ActionType::BrowserClick, factory::<BrowserClickAction>)
            .register(ActionType::ExtractJsonFields, factory::<ExtractJsonFieldsAction>)
            .register(ActionType::ExtractDocFields, factory::<ExtractDocFieldsAction>)
            .register(ActionType::ExtractDocGroups, factory::<ExtractDocGroupsAction>)
            .register(ActionType::CheckProcessed, factory::<CheckProcessedAction>)
            .register(ActionType::SaveRecord, factory::<SaveRecordAction>)
            .register(ActionType::StartProcess, factory::<StartProcessAction>)
            .register(ActionType::MergeProcesses, factory::<MergeProcessesAction>)
            .register(ActionType::ListErrors, factory::<ListErrorsAction>)
            .register(ActionType::MarkFixed, factory::<MarkFixedAction>);
        registry
    }
}

impl Registry {
    /// A registry without any kinds.
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Adds or replaces the constructor for `kind`.
    pub fn register(
        &mut self,
        kind: impl AsRef<str>,
        factory: ActionFactory,
    ) -> &mut Self {
        self.factories.insert(kind.as_ref().to_string(), factory);
        self
    }

    pub fn contains(
        &self,
        kind: &str,
    ) -> bool {
        self.factories.contains_key(kind)
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds = self.factories.keys().map(|k| k.as_str()).collect::<Vec<_>>();
        kinds.sort();
        kinds
    }

    /// Constructs the action for one node without touching its children.
    pub fn create(
        &self,
        config: &ActionConfig,
    ) -> Result<Box<dyn Action>> {
        let kind = config.kind()?;
        let factory = self.factories.get(kind).ok_or_else(|| ScrapeflowError::Pipeline(format!("Action {} not found in the registry", kind)))?;
        factory(config.params_value()).map_err(|e| ScrapeflowError::Pipeline(format!("invalid node '{}': {}", config.name, e)))
    }

    /// Checks that every node of the tree resolves and constructs.
    pub fn validate(
        &self,
        config: &ActionConfig,
    ) -> Result<()> {
        self.create(config)?;
        config.children.iter().try_for_each(|child| self.validate(child))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn test_every_builtin_is_registered() {
        let registry = Registry::default();
        for kind in ActionType::iter().filter(|k| *k != ActionType::Custom) {
            assert!(registry.contains(kind.as_ref()), "{} missing", kind);
        }
    }

    #[test]
    fn test_unknown_kind_fails() {
        let registry = Registry::default();
        let err = registry.create(&ActionConfig::new("Mystery (does.not.exist)")).err().unwrap();
        assert!(err.to_string().contains("does.not.exist"));
    }

    #[test]
    fn test_validate_walks_children() {
        let registry = Registry::default();
        let tree = ActionConfig::new("Root (pipeline.wrapper)").with_children(vec![
            ActionConfig::new("Log (log)").with_param("text", "hi"),
            ActionConfig::new("Fan out (multiprocessing.start)").with_children(vec![ActionConfig::new("Bad (nope)")]),
        ]);
        assert!(registry.validate(&tree).is_err());
    }

    #[test]
    fn test_invalid_params() {
        let registry = Registry::default();
        let config = ActionConfig::new("Each (controls.for_each)").with_param("target_field", json!("job"));
        let err = registry.create(&config).err().unwrap();
        assert!(err.to_string().contains("Each (controls.for_each)"));
    }
}
