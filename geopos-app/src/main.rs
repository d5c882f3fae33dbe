use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use geopos_catalog::CatalogSnapshot;
use geopos_config::AppConfig;
use geopos_core::projection::Datum;
use geopos_engine::OpenReport;
use geopos_engine::command::{CommandBus, CommandContext, CommandRequest};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

use crate::datum::ShiftTransform;
use crate::workspace::NodeWorkspace;

mod datum;
mod workspace;

/// 路口平面图编辑工具。每个命令作用于一个节点目录。
#[derive(Debug, Parser)]
#[command(name = "geopos", version)]
struct Cli {
    /// 配置文件路径，缺省时自动发现。
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// 打开节点；文档新建或迁移后保存。
    Open { node: PathBuf },
    /// 修改平面图的 MASSSTAB、AUSLEGUNG 或 FORMAT。
    Layout {
        node: PathBuf,
        plan: String,
        attribute: String,
        value: String,
    },
    /// 把平面图原点移到测量坐标。
    Move {
        node: PathBuf,
        plan: String,
        x: f64,
        y: f64,
    },
    /// 列出每个平面图可选的布局值。
    Limits { node: PathBuf },
    /// 按记录重新生成静态层和动态层。
    Refresh { node: PathBuf },
    /// 写回记录文件和部署配置。
    Export {
        node: PathBuf,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// 把整个文档换算到另一数据基准，并导出换算后的记录。
    ConvertDatum { node: PathBuf, target: Option<String> },
    /// 执行任意编辑命令，例如 `change_title_block LAGEPLAN unten-rechts hoch`。
    Run {
        node: PathBuf,
        name: String,
        #[arg(allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = load_configuration(cli.config);
    init_logging(&config);
    info!("启动 geopos");

    match run(cli.command, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %format!("{err:#}"), "命令执行失败");
            eprintln!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command, config: &AppConfig) -> Result<()> {
    let catalog = workspace::load_catalog(&config.catalog)?;
    let node = |dir: PathBuf| NodeWorkspace::new(dir, &config.workspace);
    match command {
        Command::Open { node: dir } => {
            let workspace = node(dir);
            let (session, report) = workspace.open(catalog)?;
            print_open_report(&report);
            if (report.created || report.file_updated) && !session.node().mode.is_read_only() {
                workspace.save(&session)?;
            }
            Ok(())
        }
        Command::Layout {
            node: dir,
            plan,
            attribute,
            value,
        } => execute(
            &node(dir),
            catalog,
            &[CommandRequest::new(
                "change_layout",
                &[plan.as_str(), attribute.as_str(), value.as_str()],
            )],
            true,
        ),
        Command::Move { node: dir, plan, x, y } => execute(
            &node(dir),
            catalog,
            &[CommandRequest::new(
                "change_position",
                &[plan.as_str(), x.to_string().as_str(), y.to_string().as_str()],
            )],
            true,
        ),
        Command::Limits { node: dir } => execute(
            &node(dir),
            catalog,
            &[CommandRequest::new("plan_limits", &[])],
            false,
        ),
        Command::Refresh { node: dir } => execute(
            &node(dir),
            catalog,
            &[
                CommandRequest::new("refresh_static", &[]),
                CommandRequest::new("refresh_dynamic", &[]),
            ],
            true,
        ),
        Command::Export { node: dir, out } => {
            let workspace = node(dir);
            let (session, _) = workspace.open(catalog)?;
            let target = workspace.export(&session, out.as_deref())?;
            println!("已导出到 {}", target.display());
            Ok(())
        }
        Command::ConvertDatum { node: dir, target } => {
            let raw = target.unwrap_or_else(|| config.workspace.target_datum.clone());
            let target: Datum = raw
                .parse()
                .with_context(|| format!("无效的数据基准 {raw:?}"))?;
            let workspace = node(dir);
            let (mut session, _) = workspace.open(catalog)?;
            let source = session.node().datum;
            session
                .convert_datum(&ShiftTransform, target)
                .context("基准换算失败")?;
            workspace.save(&session)?;
            // 记录里的坐标和 KNOTEN 基准要随文档一起换算
            let exported = workspace.export(&session, None)?;
            println!("{source} -> {target}");
            println!("已导出到 {}", exported.display());
            Ok(())
        }
        Command::Run {
            node: dir,
            name,
            args,
        } => {
            let args: Vec<&str> = args.iter().map(String::as_str).collect();
            execute(&node(dir), catalog, &[CommandRequest::new(name, &args)], true)
        }
    }
}

/// 依次执行命令，任一失败即停止；全部成功且需要时保存文档。
fn execute(
    workspace: &NodeWorkspace,
    catalog: Arc<CatalogSnapshot>,
    requests: &[CommandRequest],
    persist: bool,
) -> Result<()> {
    let (mut session, _) = workspace.open(catalog)?;
    let bus = CommandBus::new();
    let mut context = CommandContext {
        session: &mut session,
        records: workspace.records(),
    };
    for request in requests {
        let response = bus.dispatch(request, &mut context);
        let message = response.message.unwrap_or_default();
        if !response.success {
            bail!("{message}");
        }
        println!("{message}");
    }
    if persist {
        if session.node().mode.is_read_only() {
            info!(mode = %session.node().mode, "只读模式，文档不保存");
        } else {
            workspace.save(&session)?;
        }
    }
    Ok(())
}

fn print_open_report(report: &OpenReport) {
    if report.created {
        println!("文档已按记录新建");
    } else if report.migration.is_noop() {
        println!("文档版本 {}", report.migration.final_version);
    } else {
        println!(
            "文档已迁移 {} -> {}（{} 步）",
            report.migration.original_version,
            report.migration.final_version,
            report.migration.steps_applied
        );
    }
    for plan in &report.added_plans {
        println!("补充平面图 {plan}");
    }
    for (label, reconcile) in [("静态层", &report.statics), ("动态层", &report.dynamics)] {
        println!("{label}: {} 个类别", reconcile.categories.len());
        for (category, message) in reconcile.failures() {
            println!("  {category} 失败: {message}");
        }
    }
    if !report.title_blocks.is_empty() {
        println!("新建图框 {}", report.title_blocks.len());
    }
}

fn load_configuration(explicit: Option<PathBuf>) -> AppConfig {
    let loaded = match &explicit {
        Some(path) => AppConfig::from_file(path),
        None => AppConfig::discover(),
    };
    // 订阅器尚未安装，只能直接写 stderr
    loaded.unwrap_or_else(|err| {
        eprintln!("配置不可用，使用默认值: {err}");
        AppConfig::default()
    })
}

fn init_logging(config: &AppConfig) {
    let filter = EnvFilter::try_new(&config.logging.level).unwrap_or_else(|err| {
        eprintln!("日志等级 {:?} 无效 ({err})，改用 info", config.logging.level);
        EnvFilter::new("info")
    });
    // 重复初始化（测试中）时保留已有订阅器
    let _ = fmt()
        .with_env_filter(filter)
        .with_ansi(config.logging.ansi)
        .with_writer(std::io::stderr)
        .try_init();
}
