use serde::Serialize;
use std::{
    error::Error,
    fs,
    io::{self, Read},
    path::Path,
};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use pkgvisor::{
    catalog::{Catalog, Platform},
    cli::{Cli, Commands, ConfigCommand, parse_args},
    config::{Settings, load_settings},
    download::HttpFetcher,
    error::{VisorError, Warning},
    installer::{InstallOptions, InstallProgress, Installer},
    process::{SysinfoProcessTable, SystemLauncher},
    registry::InstallRegistry,
    runtime::RuntimeLayout,
    service_config::ConfigManager,
    supervisor::{ServiceStatus, StartOutcome, StopOutcome, Supervisor},
};

fn main() -> Result<(), Box<dyn Error>> {
    let args = parse_args();
    init_logging(&args);

    let json = args.json;
    match run(args) {
        Ok(()) => Ok(()),
        Err(err) if json => {
            let body = serde_json::json!({
                "error": { "kind": err.kind(), "message": err.to_string() }
            });
            println!("{body}");
            std::process::exit(1);
        }
        Err(err) => Err(err.into()),
    }
}

fn init_logging(args: &Cli) {
    let filter = if let Some(level) = args.log_level {
        EnvFilter::new(level.as_str())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

/// Everything a command needs, built once per invocation.
struct Context {
    settings: Settings,
    catalog: Catalog,
    layout: RuntimeLayout,
    platform: Platform,
    json: bool,
}

impl Context {
    fn load(args: &Cli) -> Result<Self, VisorError> {
        let settings = load_settings(args.config.as_deref())?;
        let catalog = settings.build_catalog()?;
        let layout =
            RuntimeLayout::resolve(args.base_dir.as_deref(), settings.base_dir().as_deref());
        let platform = Platform::current();
        debug!("Base dir {} on {platform}", layout.base_dir().display());
        Ok(Self {
            settings,
            catalog,
            layout,
            platform,
            json: args.json,
        })
    }

    fn supervisor<'a>(
        &'a self,
        launcher: &'a SystemLauncher,
        processes: &'a SysinfoProcessTable,
    ) -> Supervisor<'a> {
        Supervisor::new(
            &self.catalog,
            &self.layout,
            self.platform.clone(),
            launcher,
            processes,
        )
    }

    fn emit<T: Serialize>(&self, value: &T, text: impl FnOnce(&T)) -> Result<(), VisorError> {
        if self.json {
            let body = serde_json::to_string_pretty(value)
                .map_err(|err| VisorError::io("failed to render JSON", io::Error::other(err)))?;
            println!("{body}");
        } else {
            text(value);
        }
        Ok(())
    }
}

fn run(args: Cli) -> Result<(), VisorError> {
    let ctx = Context::load(&args)?;
    let launcher = SystemLauncher;
    let processes = SysinfoProcessTable;

    match args.command {
        Commands::Catalog { category } => {
            let packages = ctx.catalog.by_category(category.as_deref().unwrap_or("all"));
            ctx.emit(&packages, |packages| {
                for package in packages {
                    let versions: Vec<String> = package
                        .versions
                        .iter()
                        .map(|v| match (v.latest, v.lts) {
                            (true, true) => format!("{} (latest, lts)", v.version),
                            (true, false) => format!("{} (latest)", v.version),
                            (false, true) => format!("{} (lts)", v.version),
                            (false, false) => v.version.clone(),
                        })
                        .collect();
                    println!(
                        "{:<12} {:<10} {:<22} {}",
                        package.id,
                        package.category,
                        package.name,
                        versions.join(", ")
                    );
                }
            })?;
        }
        Commands::Preview { package, version } => {
            let fetcher = HttpFetcher::new(&ctx.settings.download)?;
            let registry = InstallRegistry::new(ctx.layout.registry_path());
            let installer = installer(&ctx, &fetcher, &registry);
            let preview = installer.preview(&package, &version)?;
            ctx.emit(&preview, |preview| {
                println!("{} {}", preview.name, preview.version);
                println!("  Download: {}", preview.download.url);
                println!("  Install:  {}", preview.install_path.display());
                if preview.installed {
                    println!("  Already installed");
                }
            })?;
        }
        Commands::Install {
            package,
            version,
            force,
        } => {
            let fetcher = HttpFetcher::new(&ctx.settings.download)?;
            let registry = InstallRegistry::new(ctx.layout.registry_path());
            let installer = installer(&ctx, &fetcher, &registry);
            let json = ctx.json;
            let mut last_status = None;
            let mut report = |progress: &InstallProgress| {
                if json {
                    return;
                }
                if last_status != Some(progress.status) || progress.progress >= 100.0 {
                    println!("[{:>5.1}%] {}", progress.progress, progress.message);
                    last_status = Some(progress.status);
                }
            };

            let progress = installer
                .install(&package, &version, InstallOptions { force }, &mut report)
                .map_err(|failure| failure.error)?;
            ctx.emit(&progress, |progress| {
                print_warnings(&progress.warnings);
                if let Some(path) = &progress.install_path {
                    println!("Installed to {}", path.display());
                }
            })?;
        }
        Commands::Uninstall { package, version } => {
            let fetcher = HttpFetcher::new(&ctx.settings.download)?;
            let registry = InstallRegistry::new(ctx.layout.registry_path());
            let installer = installer(&ctx, &fetcher, &registry);
            let removed = installer.uninstall(&package, &version)?;
            ctx.emit(&removed, |removed| {
                print_warnings(&removed.warnings);
                println!("Removed {}", removed.install_path.display());
            })?;
        }
        Commands::Installed => {
            let fetcher = HttpFetcher::new(&ctx.settings.download)?;
            let registry = InstallRegistry::new(ctx.layout.registry_path());
            let installer = installer(&ctx, &fetcher, &registry);
            let entries = installer.installed();
            ctx.emit(&entries, |entries| {
                if entries.is_empty() {
                    println!("No installed packages.");
                }
                for entry in entries {
                    let state = if entry.complete { "" } else { " (incomplete)" };
                    println!(
                        "{:<12} {:<10} {}{state}",
                        entry.package_id,
                        entry.version,
                        entry.install_path.display()
                    );
                }
            })?;
        }
        Commands::Status { package, version } => {
            let supervisor = ctx.supervisor(&launcher, &processes);
            match (package, version) {
                (Some(package), Some(version)) => {
                    let status = supervisor.status(&package, &version)?;
                    ctx.emit(&status, print_status)?;
                }
                _ => {
                    let statuses = supervisor.statuses();
                    ctx.emit(&statuses, |statuses| {
                        if statuses.is_empty() {
                            println!("No installed packages.");
                        }
                        statuses.iter().for_each(print_status);
                    })?;
                }
            }
        }
        Commands::Start { package, version } => {
            let supervisor = ctx.supervisor(&launcher, &processes);
            let report = supervisor.start(&package, &version)?;
            ctx.emit(&report, |report| {
                print_warnings(&report.warnings);
                print_start(&package, &version, &report.outcome);
            })?;
        }
        Commands::Stop { package, version } => {
            let supervisor = ctx.supervisor(&launcher, &processes);
            let report = supervisor.stop(&package, &version)?;
            ctx.emit(&report, |report| {
                print_warnings(&report.warnings);
                match &report.outcome {
                    StopOutcome::NotRunning => println!("{package} {version} is not running"),
                    StopOutcome::NotADaemon => {
                        println!("{package} {version} does not run in the background")
                    }
                    StopOutcome::Stopped { forced: true, .. } => {
                        println!("Terminated {package} {version}")
                    }
                    StopOutcome::Stopped { .. } => println!("Stopped {package} {version}"),
                }
            })?;
        }
        Commands::Restart { package, version } => {
            let supervisor = ctx.supervisor(&launcher, &processes);
            let report = supervisor.restart(&package, &version)?;
            ctx.emit(&report, |report| {
                print_warnings(&report.warnings);
                print_start(&package, &version, &report.outcome);
            })?;
        }
        Commands::Config { action } => {
            let manager = ConfigManager::new(&ctx.catalog, &ctx.layout, ctx.platform.clone());
            match action {
                ConfigCommand::Show { package, version } => {
                    let document = manager.read(&package, &version)?;
                    ctx.emit(&document, |document| print!("{}", document.content))?;
                }
                ConfigCommand::Set {
                    package,
                    version,
                    file,
                } => {
                    let content = read_input(&file)?;
                    let path = manager.write(&package, &version, &content)?;
                    info!("Config for {package} {version} replaced");
                    ctx.emit(&serde_json::json!({ "path": path }), |_| {
                        println!("Wrote {}", path.display())
                    })?;
                }
            }
        }
        Commands::Logs {
            package,
            version,
            lines,
        } => {
            let supervisor = ctx.supervisor(&launcher, &processes);
            let excerpt = supervisor.read_log(&package, &version, lines)?;
            ctx.emit(&excerpt, |excerpt| {
                if excerpt.content.ends_with('\n') {
                    print!("{}", excerpt.content);
                } else {
                    println!("{}", excerpt.content);
                }
            })?;
        }
    }

    Ok(())
}

fn installer<'a>(
    ctx: &'a Context,
    fetcher: &'a HttpFetcher,
    registry: &'a InstallRegistry,
) -> Installer<'a> {
    Installer::new(
        &ctx.catalog,
        &ctx.layout,
        ctx.platform.clone(),
        fetcher,
        registry,
    )
    .verify_checksums(ctx.settings.download.verify_checksums)
}

fn read_input(path: &Path) -> Result<String, VisorError> {
    if path == Path::new("-") {
        let mut content = String::new();
        io::stdin()
            .read_to_string(&mut content)
            .map_err(|err| VisorError::io("failed to read stdin", err))?;
        return Ok(content);
    }
    fs::read_to_string(path)
        .map_err(|err| VisorError::io(format!("failed to read {}", path.display()), err))
}

fn print_warnings(warnings: &[Warning]) {
    for warning in warnings {
        println!("warning: {}", warning.message);
    }
}

fn print_start(package: &str, version: &str, outcome: &StartOutcome) {
    match outcome {
        StartOutcome::Spawned { pid } => println!("Started {package} {version} (PID {pid})"),
        StartOutcome::Available => println!("{package} {version} is available"),
    }
}

fn print_status(status: &ServiceStatus) {
    let state = match (status.daemon, status.running) {
        (true, true) => "Running",
        (true, false) => "Stopped",
        (false, true) => "Available",
        (false, false) => "Missing executable",
    };
    println!("● {} {} - {state}", status.package_id, status.version);
    if let Some(pid) = status.pid {
        println!("     PID: {pid}");
    }
    if let Some(port) = status.port {
        println!("    Port: {port}");
    }
    println!("    Path: {}", status.install_path.display());
}
