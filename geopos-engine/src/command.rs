use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;

use geopos_core::document::{PlanId, TitleBlockPosition};
use geopos_core::geometry::Point2;
use geopos_core::projection::Orientation;
use geopos_core::records::RecordSource;

use crate::layout::LayoutAttribute;
use crate::session::PlanSession;
use crate::static_layer::ReconcileReport;

#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub name: String,
    pub args: Vec<String>,
}

impl CommandRequest {
    pub fn new(name: impl Into<String>, args: &[&str]) -> Self {
        Self {
            name: name.into(),
            args: args.iter().map(|arg| arg.to_string()).collect(),
        }
    }

    fn arg(&self, index: usize, what: &str) -> Result<&str, CommandResponse> {
        self.args
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| CommandResponse::err(format!("{}: 缺少参数 {}", self.name, what)))
    }

    fn parse<T>(&self, index: usize, what: &str) -> Result<T, CommandResponse>
    where
        T: FromStr,
        T::Err: Display,
    {
        let raw = self.arg(index, what)?;
        raw.parse::<T>().map_err(|err| {
            CommandResponse::err(format!("{}: 参数 {} 无效: {}", self.name, what, err))
        })
    }
}

#[derive(Debug, Clone)]
pub struct CommandResponse {
    pub success: bool,
    pub message: Option<String>,
}

impl CommandResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }
}

pub trait CommandHandler: Send + Sync {
    fn name(&self) -> &'static str;
    fn execute(
        &self,
        request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse;
}

/// 命令执行时可见的会话和记录。
pub struct CommandContext<'a> {
    pub session: &'a mut PlanSession,
    pub records: &'a dyn RecordSource,
}

pub struct CommandBus {
    handlers: HashMap<&'static str, Box<dyn CommandHandler>>,
}

impl Default for CommandBus {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandBus {
    pub fn new() -> Self {
        let mut bus = Self {
            handlers: HashMap::new(),
        };
        bus.register(ChangeLayoutCommand);
        bus.register(ChangePositionCommand);
        bus.register(PlanLimitsCommand);
        bus.register(RefreshStaticCommand);
        bus.register(RefreshDynamicCommand);
        bus.register(ResetPositionsCommand);
        bus.register(ChangeTitleBlockCommand);
        bus.register(InvertTitleBlockCommand);
        bus.register(ChangeSymbolCommand);
        bus
    }

    pub fn register<H: CommandHandler + 'static>(&mut self, handler: H) {
        self.handlers.insert(handler.name(), Box::new(handler));
    }

    pub fn dispatch(
        &self,
        request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        if let Some(handler) = self.handlers.get(request.name.as_str()) {
            handler.execute(request, context)
        } else {
            CommandResponse::err(format!("未知命令: {}", request.name))
        }
    }

    pub fn available_commands(&self) -> impl Iterator<Item = &&'static str> {
        self.handlers.keys()
    }
}

/// 把处理结果转换成响应，失败时附上原因。
fn respond<T, E: Display>(
    result: Result<T, E>,
    context: &str,
    message: impl FnOnce(T) -> String,
) -> CommandResponse {
    match result {
        Ok(value) => CommandResponse::ok(message(value)),
        Err(err) => CommandResponse::err(format!("{context}: {err}")),
    }
}

fn reconcile_summary(report: &ReconcileReport) -> String {
    let failed: Vec<&str> = report.failures().map(|(category, _)| category).collect();
    if failed.is_empty() {
        format!("{} 个类别已对齐", report.categories.len())
    } else {
        format!("{} 个类别已对齐，失败: {}", report.categories.len(), failed.join(", "))
    }
}

macro_rules! try_args {
    ($expr:expr) => {
        match $expr {
            Ok(value) => value,
            Err(response) => return response,
        }
    };
}

struct ChangeLayoutCommand;

impl CommandHandler for ChangeLayoutCommand {
    fn name(&self) -> &'static str {
        "change_layout"
    }

    fn execute(
        &self,
        request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        let plan: PlanId = try_args!(request.parse(0, "PLAN"));
        let attribute: LayoutAttribute = try_args!(request.parse(1, "ATTR"));
        let value = try_args!(request.arg(2, "VALUE"));
        respond(
            context.session.change_layout(plan, attribute, value),
            "布局更改失败",
            |updates| format!("{attribute} = {value}，{} 个平面图已更新", updates.len()),
        )
    }
}

struct ChangePositionCommand;

impl CommandHandler for ChangePositionCommand {
    fn name(&self) -> &'static str {
        "change_position"
    }

    fn execute(
        &self,
        request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        let plan: PlanId = try_args!(request.parse(0, "PLAN"));
        let x: f64 = try_args!(request.parse(1, "X"));
        let y: f64 = try_args!(request.parse(2, "Y"));
        respond(
            context
                .session
                .change_position_survey(plan, Point2::new(x, y)),
            "平面图移动失败",
            |change| {
                format!(
                    "{plan} 已移动 ({:.3}, {:.3})",
                    change.delta.x(),
                    change.delta.y()
                )
            },
        )
    }
}

struct PlanLimitsCommand;

impl CommandHandler for PlanLimitsCommand {
    fn name(&self) -> &'static str {
        "plan_limits"
    }

    fn execute(
        &self,
        _request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        respond(context.session.plan_limits(), "可选值计算失败", |limits| {
            limits
                .iter()
                .map(|(plan, values)| {
                    format!(
                        "{plan}: massstab {} auslegung {} format {}",
                        allowed_values(&values.massstab),
                        allowed_values(&values.auslegung),
                        allowed_values(&values.format)
                    )
                })
                .collect::<Vec<_>>()
                .join("\n")
        })
    }
}

fn allowed_values<T: Display>(values: &[(T, bool)]) -> String {
    values
        .iter()
        .filter(|(_, fits)| *fits)
        .map(|(value, _)| value.to_string())
        .collect::<Vec<_>>()
        .join("/")
}

struct RefreshStaticCommand;

impl CommandHandler for RefreshStaticCommand {
    fn name(&self) -> &'static str {
        "refresh_static"
    }

    fn execute(
        &self,
        _request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        respond(
            context.session.refresh_static(context.records),
            "静态层刷新失败",
            |report| reconcile_summary(&report),
        )
    }
}

struct RefreshDynamicCommand;

impl CommandHandler for RefreshDynamicCommand {
    fn name(&self) -> &'static str {
        "refresh_dynamic"
    }

    fn execute(
        &self,
        _request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        respond(
            context.session.refresh_dynamic(context.records),
            "动态层刷新失败",
            |report| reconcile_summary(&report),
        )
    }
}

struct ResetPositionsCommand;

impl CommandHandler for ResetPositionsCommand {
    fn name(&self) -> &'static str {
        "reset_positions"
    }

    fn execute(
        &self,
        _request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        respond(
            context.session.reset_positions(),
            "动态对象复位失败",
            |moved| format!("{moved} 个动态对象已复位"),
        )
    }
}

struct ChangeTitleBlockCommand;

impl CommandHandler for ChangeTitleBlockCommand {
    fn name(&self) -> &'static str {
        "change_title_block"
    }

    fn execute(
        &self,
        request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        let plan: PlanId = try_args!(request.parse(0, "PLAN"));
        let position: TitleBlockPosition = try_args!(request.parse(1, "POSITION"));
        let auslegung: Orientation = try_args!(request.parse(2, "ORIENTATION"));
        respond(
            context
                .session
                .change_title_block(plan, position, auslegung),
            "图框更改失败",
            |transform| format!("{plan} 图框: {transform}"),
        )
    }
}

struct InvertTitleBlockCommand;

impl CommandHandler for InvertTitleBlockCommand {
    fn name(&self) -> &'static str {
        "invert_title_block"
    }

    fn execute(
        &self,
        request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        let plan: PlanId = try_args!(request.parse(0, "PLAN"));
        respond(
            context.session.invert_title_block(plan),
            "图框翻转失败",
            |transform| format!("{plan} 图框: {transform}"),
        )
    }
}

struct ChangeSymbolCommand;

impl CommandHandler for ChangeSymbolCommand {
    fn name(&self) -> &'static str {
        "change_symbol"
    }

    fn execute(
        &self,
        request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        let category = try_args!(request.arg(0, "CATEGORY"));
        let id = try_args!(request.arg(1, "ID"));
        let symbol = try_args!(request.arg(2, "SYMBOL"));
        respond(
            context.session.change_symbol(category, id, symbol),
            "符号更换失败",
            |()| format!("{category}/{id} 使用符号 {symbol}"),
        )
    }
}
