use clap::{Arg, ArgAction, ArgMatches, Command};

/// 构建命令行应用 / Build the command line application
pub fn build_app() -> Command {
    Command::new("vmdm")
        .version(env!("CARGO_PKG_VERSION"))
        .about("主数据管理：动态表结构与变更审批")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("PATH")
                .help("额外的 TOML 配置文件")
                .global(true),
        )
        .subcommand(Command::new("init-db").about("创建目录与审批系统表"))
        .subcommand(
            Command::new("reconcile")
                .about("按字段目录迁移物理表")
                .arg(
                    Arg::new("table")
                        .short('t')
                        .long("table")
                        .value_name("CODE")
                        .help("只迁移指定表，缺省迁移全部已登记表"),
                ),
        )
        .subcommand(Command::new("serve").about("运行过期与催办扫描，Ctrl-C 退出"))
        .subcommand(Command::new("sweep").about("执行一次过期与催办扫描后退出"))
        .subcommand(
            Command::new("version").about("显示版本信息").arg(
                Arg::new("verbose")
                    .short('v')
                    .long("verbose")
                    .action(ArgAction::SetTrue),
            ),
        )
}

/// 解析后的子命令 / Parsed subcommand
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliCommand {
    InitDb,
    Reconcile { table: Option<String> },
    Serve,
    Sweep,
    Version,
}

/// 返回 (配置文件, 子命令) / returns (config file, subcommand)
pub fn parse_command(matches: &ArgMatches) -> anyhow::Result<(Option<String>, CliCommand)> {
    let config = matches.get_one::<String>("config").cloned();
    let command = match matches.subcommand() {
        Some(("init-db", _)) => CliCommand::InitDb,
        Some(("reconcile", sub)) => CliCommand::Reconcile {
            table: sub.get_one::<String>("table").cloned(),
        },
        Some(("serve", _)) => CliCommand::Serve,
        Some(("sweep", _)) => CliCommand::Sweep,
        Some(("version", _)) => CliCommand::Version,
        Some((other, _)) => anyhow::bail!("未知命令 '{}'", other),
        None => anyhow::bail!("未知命令，请使用 --help 查看可用命令"),
    };
    Ok((config, command))
}
