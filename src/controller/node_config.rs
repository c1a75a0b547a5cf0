use std::sync::Arc;

use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::ast::Block;
use crate::ast::Body;
use crate::dag::NodeId;
use crate::errors::ConfigError;
use crate::errors::EvalError;
use crate::eval::Evaluator;
use crate::eval::Scope;

use super::node_custom::is_valid_identifier;
use super::CustomComponentRegistry;
use super::DECLARE_BLOCK;

pub const LOGGING_BLOCK: &str = "logging";
pub const TRACING_BLOCK: &str = "tracing";
pub const ARGUMENT_BLOCK: &str = "argument";
pub const EXPORT_BLOCK: &str = "export";
pub const IMPORT_BLOCK: &str = "import";

/// Pre-parsed module content keyed by a logical source name. The file,
/// HTTP, and Git mechanisms that produce the content live outside the
/// controller; by the time it gets here it is already a parsed body.
pub type ImportSource = Arc<dyn Fn(&str) -> Option<Body> + Send + Sync>;

/// Whether a block name is reserved for controller-owned config nodes.
pub fn is_config_block(name: &str) -> bool {
    matches!(
        name,
        LOGGING_BLOCK | TRACING_BLOCK | ARGUMENT_BLOCK | EXPORT_BLOCK | IMPORT_BLOCK
    )
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LoggingOptions {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        LoggingOptions {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TracingOptions {
    #[serde(default = "default_sampling_fraction")]
    pub sampling_fraction: f64,
}

impl Default for TracingOptions {
    fn default() -> Self {
        TracingOptions {
            sampling_fraction: default_sampling_fraction(),
        }
    }
}

/// Controller-owned singleton blocks.
///
/// `logging` and `tracing` configure the root controller and are
/// rejected inside modules; `argument` and `export` define a module's
/// input and output surface and are rejected at the root. `import`
/// blocks pull externally supplied templates into the custom component
/// registry and are allowed anywhere.
pub enum ConfigNode {
    Logging(LoggingNode),
    Tracing(TracingNode),
    Argument(ArgumentNode),
    Export(ExportNode),
    Import(ImportNode),
}

impl ConfigNode {
    /// Classifies and validates a config block. `in_module` gates which
    /// kinds are acceptable.
    pub fn new(
        block: Block,
        in_module: bool,
    ) -> Result<ConfigNode, ConfigError> {
        match block.block_name().as_str() {
            LOGGING_BLOCK => {
                if in_module {
                    return Err(ConfigError::NotAllowedInModule { kind: LOGGING_BLOCK });
                }
                Ok(ConfigNode::Logging(LoggingNode::new(block)))
            }
            TRACING_BLOCK => {
                if in_module {
                    return Err(ConfigError::NotAllowedInModule { kind: TRACING_BLOCK });
                }
                Ok(ConfigNode::Tracing(TracingNode::new(block)))
            }
            ARGUMENT_BLOCK => {
                if !in_module {
                    return Err(ConfigError::OnlyAllowedInModule { kind: ARGUMENT_BLOCK });
                }
                let label = require_label(&block)?;
                Ok(ConfigNode::Argument(ArgumentNode::new(block, label)))
            }
            EXPORT_BLOCK => {
                if !in_module {
                    return Err(ConfigError::OnlyAllowedInModule { kind: EXPORT_BLOCK });
                }
                let label = require_label(&block)?;
                Ok(ConfigNode::Export(ExportNode::new(block, label)))
            }
            other => Err(ConfigError::UnknownComponent {
                name: other.to_string(),
            }),
        }
    }

    /// An empty `logging` block carrying defaults, added when the root
    /// configuration omits one.
    pub fn default_logging() -> ConfigNode {
        ConfigNode::Logging(LoggingNode::new(Block::new([LOGGING_BLOCK], None, Body::new())))
    }

    /// An empty `tracing` block carrying defaults.
    pub fn default_tracing() -> ConfigNode {
        ConfigNode::Tracing(TracingNode::new(Block::new([TRACING_BLOCK], None, Body::new())))
    }

    pub fn node_id(&self) -> &NodeId {
        match self {
            ConfigNode::Logging(n) => &n.id,
            ConfigNode::Tracing(n) => &n.id,
            ConfigNode::Argument(n) => &n.id,
            ConfigNode::Export(n) => &n.id,
            ConfigNode::Import(n) => &n.id,
        }
    }

    pub fn block(&self) -> Block {
        match self {
            ConfigNode::Logging(n) => n.state.lock().block.clone(),
            ConfigNode::Tracing(n) => n.state.lock().block.clone(),
            ConfigNode::Argument(n) => n.state.lock().block.clone(),
            ConfigNode::Export(n) => n.state.lock().block.clone(),
            ConfigNode::Import(n) => n.state.lock().block.clone(),
        }
    }

    pub fn update_block(
        &self,
        block: Block,
    ) {
        assert_eq!(
            NodeId::from_block(&block),
            *self.node_id(),
            "update_block called with a block for a different node ID",
        );

        match self {
            ConfigNode::Logging(n) => n.state.lock().replace(block),
            ConfigNode::Tracing(n) => n.state.lock().replace(block),
            ConfigNode::Argument(n) => n.state.lock().replace(block),
            ConfigNode::Export(n) => n.state.lock().replace(block),
            ConfigNode::Import(n) => n.state.lock().replace(block),
        }
    }

    pub fn evaluate(
        &self,
        scope: &Scope,
    ) -> Result<(), EvalError> {
        match self {
            ConfigNode::Logging(n) => n.evaluate(scope),
            ConfigNode::Tracing(n) => n.evaluate(scope),
            ConfigNode::Argument(n) => n.evaluate(scope),
            ConfigNode::Export(n) => n.evaluate(scope),
            ConfigNode::Import(n) => n.evaluate(scope),
        }
    }
}

struct BlockState {
    block: Block,
    evaluator: Evaluator,
}

impl BlockState {
    fn new(block: Block) -> Self {
        BlockState {
            evaluator: Evaluator::new(block.body.clone()),
            block,
        }
    }

    fn replace(
        &mut self,
        block: Block,
    ) {
        self.evaluator = Evaluator::new(block.body.clone());
        self.block = block;
    }
}

pub struct LoggingNode {
    id: NodeId,
    state: Mutex<BlockState>,
    options: Mutex<LoggingOptions>,
}

impl LoggingNode {
    fn new(block: Block) -> Self {
        LoggingNode {
            id: NodeId::from_block(&block),
            state: Mutex::new(BlockState::new(block)),
            options: Mutex::new(LoggingOptions::default()),
        }
    }

    fn evaluate(
        &self,
        scope: &Scope,
    ) -> Result<(), EvalError> {
        let decoded = self.state.lock().evaluator.clone().evaluate(scope)?;
        let options: LoggingOptions = decode_options(LOGGING_BLOCK, decoded)?;
        debug!(level = %options.level, format = %options.format, "logging options evaluated");
        *self.options.lock() = options;
        Ok(())
    }

    pub fn options(&self) -> LoggingOptions {
        self.options.lock().clone()
    }
}

pub struct TracingNode {
    id: NodeId,
    state: Mutex<BlockState>,
    options: Mutex<TracingOptions>,
}

impl TracingNode {
    fn new(block: Block) -> Self {
        TracingNode {
            id: NodeId::from_block(&block),
            state: Mutex::new(BlockState::new(block)),
            options: Mutex::new(TracingOptions::default()),
        }
    }

    fn evaluate(
        &self,
        scope: &Scope,
    ) -> Result<(), EvalError> {
        let decoded = self.state.lock().evaluator.clone().evaluate(scope)?;
        let options: TracingOptions = decode_options(TRACING_BLOCK, decoded)?;
        *self.options.lock() = options;
        Ok(())
    }

    pub fn options(&self) -> TracingOptions {
        self.options.lock().clone()
    }
}

/// One typed input of a module. The enclosing controller provides the
/// value; the block body only declares optionality and a default.
pub struct ArgumentNode {
    id: NodeId,
    label: String,
    state: Mutex<BlockState>,
    decoded: Mutex<ArgumentSpec>,
}

#[derive(Default)]
struct ArgumentSpec {
    optional: bool,
    default: Value,
}

impl ArgumentNode {
    fn new(
        block: Block,
        label: String,
    ) -> Self {
        ArgumentNode {
            id: NodeId::from_block(&block),
            label,
            state: Mutex::new(BlockState::new(block)),
            decoded: Mutex::new(ArgumentSpec::default()),
        }
    }

    fn evaluate(
        &self,
        scope: &Scope,
    ) -> Result<(), EvalError> {
        let decoded = self.state.lock().evaluator.clone().evaluate(scope)?;
        let mut spec = self.decoded.lock();
        spec.optional = decoded
            .get("optional")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        spec.default = decoded.get("default").cloned().unwrap_or(Value::Null);
        Ok(())
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn optional(&self) -> bool {
        self.decoded.lock().optional
    }

    pub fn default_value(&self) -> Value {
        self.decoded.lock().default.clone()
    }
}

/// One output of a module: re-evaluating the `value` expression feeds the
/// module's upward exports.
pub struct ExportNode {
    id: NodeId,
    label: String,
    state: Mutex<BlockState>,
    value: Mutex<Value>,
}

impl ExportNode {
    fn new(
        block: Block,
        label: String,
    ) -> Self {
        ExportNode {
            id: NodeId::from_block(&block),
            label,
            state: Mutex::new(BlockState::new(block)),
            value: Mutex::new(Value::Null),
        }
    }

    fn evaluate(
        &self,
        scope: &Scope,
    ) -> Result<(), EvalError> {
        let decoded = self.state.lock().evaluator.clone().evaluate(scope)?;
        let value = decoded.get("value").cloned().unwrap_or(Value::Null);
        *self.value.lock() = value;
        Ok(())
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn value(&self) -> Value {
        self.value.lock().clone()
    }
}

/// Brings externally supplied templates into scope under a namespace.
///
/// The block's `source` attribute names the logical content to import;
/// the resolved body may only contain declare blocks, which become
/// resolvable as `<namespace>.<declare label>`. Content is re-fetched on
/// every evaluation, so a changed source takes effect on the next apply.
pub struct ImportNode {
    id: NodeId,
    namespace: String,
    state: Mutex<BlockState>,
    source: ImportSource,
    registry: Arc<CustomComponentRegistry>,
}

impl ImportNode {
    pub fn new(
        block: Block,
        source: ImportSource,
        registry: Arc<CustomComponentRegistry>,
    ) -> Result<Self, ConfigError> {
        let namespace = require_label(&block)?;
        if namespace == IMPORT_BLOCK
            || namespace == DECLARE_BLOCK
            || !is_valid_identifier(&namespace)
        {
            return Err(ConfigError::InvalidImportLabel(namespace));
        }

        Ok(ImportNode {
            id: NodeId::from_block(&block),
            namespace,
            state: Mutex::new(BlockState::new(block)),
            source,
            registry,
        })
    }

    /// Fetches the source content and replaces the namespace's templates.
    pub(crate) fn evaluate(
        &self,
        scope: &Scope,
    ) -> Result<(), EvalError> {
        let decoded = self.state.lock().evaluator.clone().evaluate(scope)?;
        let name = decoded
            .get("source")
            .and_then(Value::as_str)
            .ok_or_else(|| EvalError::Decode {
                attribute: "source".to_string(),
                message: "import blocks require a string source attribute".to_string(),
            })?
            .to_string();

        let body = (self.source)(&name).ok_or_else(|| EvalError::Import {
            name: name.clone(),
            message: "no content for this source".to_string(),
        })?;

        let mut templates = Vec::new();
        for block in &body.blocks {
            if block.block_name() != DECLARE_BLOCK {
                return Err(EvalError::Import {
                    name,
                    message: format!(
                        "imported content may only contain declare blocks, found {:?}",
                        block.block_name(),
                    ),
                });
            }
            let label = match &block.label {
                Some(label) if label != DECLARE_BLOCK && is_valid_identifier(label) => {
                    label.clone()
                }
                other => {
                    return Err(EvalError::Import {
                        name,
                        message: format!("invalid declare label {other:?} in imported content"),
                    });
                }
            };
            templates.push((label, block.body.clone()));
        }

        debug!(
            namespace = %self.namespace,
            source = %name,
            templates = templates.len(),
            "registered imported templates",
        );
        self.registry.register_import(self.namespace.as_str(), templates);
        Ok(())
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

fn require_label(block: &Block) -> Result<String, ConfigError> {
    match &block.label {
        Some(label) if !label.is_empty() => Ok(label.clone()),
        _ => Err(ConfigError::MissingLabel {
            name: block.block_name(),
        }),
    }
}

fn decode_options<T: serde::de::DeserializeOwned>(
    block_name: &str,
    decoded: Value,
) -> Result<T, EvalError> {
    serde_json::from_value(decoded).map_err(|err| EvalError::Decode {
        attribute: block_name.to_string(),
        message: err.to_string(),
    })
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "logfmt".to_string()
}

fn default_sampling_fraction() -> f64 {
    0.1
}
