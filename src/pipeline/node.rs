use std::sync::Arc;

use tracing::{debug, warn};

use crate::{
    Result,
    error::{ActionError, Severity},
    model::{ActionConfig, PipelineModel, Properties},
    pipeline::{
        Registry, RunScope, Scope,
        actions::{Action, ActionResult},
        expr::ExprSource,
        scope::persist_marker,
    },
    runtime::Item,
    store::data::ProcessedStatus,
};

/// One live node of a pipeline tree.
pub struct ActionNode {
    config: ActionConfig,
    guard: Option<ExprSource>,
    action: Box<dyn Action>,
    children: Vec<ActionNode>,
}

impl std::fmt::Debug for ActionNode {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ActionNode").field("name", &self.config.name).field("children", &self.children).finish()
    }
}

impl ActionNode {
    /// Builds the node and, unless the action ships them elsewhere, its children.
    ///
    /// Every kind in the subtree must be registered, including children that
    /// are not built.
    pub fn build(
        config: &ActionConfig,
        registry: &Registry,
    ) -> Result<Self> {
        let action = registry.create(config)?;
        let guard = config.condition.as_deref().map(ExprSource::new).transpose()?;
        let children = if action.builds_children() {
            config.children.iter().map(|child| ActionNode::build(child, registry)).collect::<Result<Vec<_>>>()?
        } else {
            config.children.iter().try_for_each(|child| registry.validate(child))?;
            Vec::new()
        };
        Ok(Self {
            config: config.clone(),
            guard,
            action,
            children,
        })
    }

    /// Runs every action's one-time initialization, depth first.
    pub fn initialize(&mut self) -> futures::future::BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.action.initialize().await?;
            for child in self.children.iter_mut() {
                child.initialize().await?;
            }
            Ok(())
        })
    }

    pub fn config(&self) -> &ActionConfig {
        &self.config
    }

    pub fn children(&self) -> &[ActionNode] {
        &self.children
    }

    pub fn action(&self) -> &dyn Action {
        self.action.as_ref()
    }

    fn admits(
        &self,
        item: &Item,
    ) -> std::result::Result<bool, ActionError> {
        match &self.guard {
            Some(guard) => guard.is_true(item),
            None => Ok(true),
        }
    }

    /// Executes this node's own action under its failure handling.
    pub async fn execute(
        &self,
        run: &RunScope,
        item: &mut Item,
    ) -> ActionResult {
        if !run.ctx().is_running() {
            return Err(ActionError::ProcessAbort);
        }
        debug!("execute {}", self.config.name);
        let result = self.action.execute(&Scope::new(run, self), item).await;
        self.settle(run, item, result)
    }

    /// Executes the children in document order under this node's failure handling.
    pub async fn execute_children(
        &self,
        run: &RunScope,
        item: &mut Item,
    ) -> ActionResult {
        if !run.ctx().is_running() {
            return Err(ActionError::ProcessAbort);
        }
        let result = self.run_children(run, item).await;
        self.settle(run, item, result)
    }

    async fn run_children(
        &self,
        run: &RunScope,
        item: &mut Item,
    ) -> ActionResult {
        for child in &self.children {
            if !run.ctx().is_running() {
                return Err(ActionError::ProcessAbort);
            }
            if !child.admits(item)? {
                continue;
            }
            let result = child.action.execute(&Scope::new(run, child), item).await;
            match result.as_ref().err().and_then(ActionError::severity) {
                // recorded here so the next sibling still runs
                Some(Severity::Warning | Severity::Info) => self.settle(run, item, result)?,
                _ => result?,
            }
        }
        Ok(())
    }

    /// Applies the severity rules to a failure raised inside this node.
    fn settle(
        &self,
        run: &RunScope,
        item: &Item,
        result: ActionResult,
    ) -> ActionResult {
        let Err(err) = result else {
            return Ok(());
        };
        let ctx = run.ctx();
        match err {
            ActionError::ProcessAbort => Err(ActionError::ProcessAbort),
            ActionError::Unexpected(message) => {
                let message = format!("Unexpected Error '{}' at ({})", message, item.url());
                warn!("{}", message);
                self.fail(run, item, message)
            }
            ActionError::Raised {
                severity,
                message,
            } => match severity {
                Severity::Fatal => {
                    tracing::error!("fatal: {} at ({})", message, item.url());
                    Err(ActionError::fatal(message))
                }
                Severity::Error => self.fail(run, item, format!("{} at ({})", message, item.url())),
                Severity::Warning => {
                    let message = format!("{} at ({})", message, item.url());
                    ctx.record_warning(&message);
                    persist_marker(run, item, ProcessedStatus::Warning, &message);
                    Ok(())
                }
                Severity::Info => {
                    ctx.record_info(&format!("{} at ({})", message, item.url()));
                    debug!("info: {}", message);
                    Ok(())
                }
                Severity::Abort => self.contain(ActionError::abort(message)),
            },
        }
    }

    fn fail(
        &self,
        run: &RunScope,
        item: &Item,
        message: String,
    ) -> ActionResult {
        run.ctx().record_error(&message);
        persist_marker(run, item, ProcessedStatus::Error, &message);
        self.contain(ActionError::abort(message))
    }

    /// Swallows an abort when this node is a boundary.
    fn contain(
        &self,
        err: ActionError,
    ) -> ActionResult {
        if self.config.boundary {
            warn!("boundary '{}' contained: {}", self.config.label(), err);
            Ok(())
        } else {
            Err(err)
        }
    }
}

/// A built and initialized pipeline ready to run.
pub struct Pipeline {
    root: ActionNode,
    properties: Arc<Properties>,
}

impl Pipeline {
    pub async fn load(
        model: &PipelineModel,
        registry: &Registry,
    ) -> Result<Self> {
        let mut root = ActionNode::build(&model.root(), registry)?;
        root.initialize().await?;
        Ok(Self {
            root,
            properties: Arc::new(model.properties.clone()),
        })
    }

    /// Builds a pipeline from top-level actions and shared properties.
    pub async fn from_actions(
        actions: Vec<ActionConfig>,
        properties: Properties,
        registry: &Registry,
    ) -> Result<Self> {
        Self::load(
            &PipelineModel {
                actions,
                properties,
            },
            registry,
        )
        .await
    }

    pub fn root(&self) -> &ActionNode {
        &self.root
    }

    pub fn properties(&self) -> Arc<Properties> {
        self.properties.clone()
    }
}
