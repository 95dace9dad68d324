//! Lifecycle strategies, one per [`ServiceFamily`].
//!
//! A strategy knows how an instance of its family is recognized in the process
//! table, which files it reads and writes, and which commands start, initialize
//! and gracefully stop it. The supervisor only sequences these steps.
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use sysinfo::System;

use crate::{
    catalog::{PackageDescriptor, Platform, ServiceFamily},
    constants::{DB_PRIMARY_DATA_FILE, DEFAULT_DB_PORT, DEFAULT_REDIS_PORT, FASTCGI_BIND},
    error::VisorError,
    process::CommandSpec,
    runtime::RuntimeLayout,
};

/// One installed instance as seen by a strategy.
#[derive(Debug, Clone)]
pub struct Instance<'a> {
    pub package: &'a PackageDescriptor,
    pub version: &'a str,
    pub install_dir: PathBuf,
    pub platform: &'a Platform,
}

impl<'a> Instance<'a> {
    pub fn new(
        package: &'a PackageDescriptor,
        version: &'a str,
        install_dir: PathBuf,
        platform: &'a Platform,
    ) -> Self {
        Self {
            package,
            version,
            install_dir,
            platform,
        }
    }

    /// Instance at its conventional location under `layout`.
    pub fn locate(
        package: &'a PackageDescriptor,
        version: &'a str,
        layout: &RuntimeLayout,
        platform: &'a Platform,
    ) -> Self {
        let install_dir = layout.install_dir(&package.install_subpath, version);
        Self::new(package, version, install_dir, platform)
    }

    /// Whether the instance directory exists.
    pub fn is_installed(&self) -> bool {
        self.install_dir.is_dir()
    }

    /// Path of a `/`-separated relative path inside the instance.
    pub fn path(&self, relative: &str) -> PathBuf {
        relative
            .split('/')
            .filter(|part| !part.is_empty())
            .fold(self.install_dir.clone(), |path, part| path.join(part))
    }

    /// Binary name with the platform's executable suffix.
    pub fn exe_name(&self, base: &str) -> String {
        if self.platform.is_windows() {
            format!("{base}.exe")
        } else {
            base.to_string()
        }
    }

    /// Executable declared in the catalog for this platform.
    pub fn catalog_executable(&self) -> Result<PathBuf, VisorError> {
        self.package
            .executable_for(self.platform)
            .map(|relative| self.path(relative))
            .ok_or_else(|| VisorError::NoExecutable {
                package: self.package.id.clone(),
                os: self.platform.os.clone(),
            })
    }

    /// Primary port from the catalog, or `fallback`.
    pub fn port(&self, fallback: u16) -> u16 {
        self.package.primary_port().unwrap_or(fallback)
    }

    /// Label used in logs and errors, e.g. `mysql 8.0.35`.
    pub fn label(&self) -> String {
        format!("{} {}", self.package.id, self.version)
    }
}

/// Renders a path with forward slashes, as config files expect on every OS.
fn slashed(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Lifecycle of a package family.
pub trait Lifecycle: Sync {
    /// `false` for runtimes and tools: "running" means "available on disk"
    /// and stop is a no-op.
    fn is_daemon(&self) -> bool {
        true
    }

    /// Process names (without `.exe`) that identify a running instance.
    fn process_names(&self, instance: &Instance<'_>) -> Vec<String>;

    /// Config file location, if the package has one.
    fn config_path(&self, instance: &Instance<'_>) -> Option<PathBuf> {
        instance
            .package
            .config_file
            .as_deref()
            .map(|relative| instance.path(relative))
    }

    /// Default config content synthesized when the file is absent.
    fn default_config(&self, _instance: &Instance<'_>) -> Option<String> {
        None
    }

    /// Log file shown by `read_log`.
    fn log_path(&self, _instance: &Instance<'_>) -> Option<PathBuf> {
        None
    }

    /// Executable that the start command launches.
    fn executable(&self, instance: &Instance<'_>) -> Result<PathBuf, VisorError> {
        instance.catalog_executable()
    }

    /// Prepares the instance directory before a start. Returns a one-time
    /// initialization command that must complete before the daemon launches.
    fn prepare(&self, _instance: &Instance<'_>) -> io::Result<Option<CommandSpec>> {
        Ok(None)
    }

    /// Command that launches the long-running process.
    fn start_command(&self, instance: &Instance<'_>, executable: &Path) -> CommandSpec {
        CommandSpec::new(executable).current_dir(&instance.install_dir)
    }

    /// Administrative shutdown command, if the family has one.
    fn stop_command(&self, _instance: &Instance<'_>) -> Option<CommandSpec> {
        None
    }
}

/// Returns the strategy registered for `family`.
pub fn lifecycle_for(family: ServiceFamily) -> &'static dyn Lifecycle {
    match family {
        ServiceFamily::Mysql => &MYSQL,
        ServiceFamily::Mariadb => &MARIADB,
        ServiceFamily::Nginx => &NginxLifecycle,
        ServiceFamily::Redis => &RedisLifecycle,
        ServiceFamily::PhpFastcgi => &PhpFastcgiLifecycle,
        ServiceFamily::Runtime | ServiceFamily::Tool => &PassiveLifecycle,
        ServiceFamily::Generic => &GenericLifecycle,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DbFlavor {
    Mysql,
    Mariadb,
}

/// MySQL and MariaDB servers.
#[derive(Debug)]
pub struct DatabaseLifecycle {
    flavor: DbFlavor,
}

static MYSQL: DatabaseLifecycle = DatabaseLifecycle {
    flavor: DbFlavor::Mysql,
};
static MARIADB: DatabaseLifecycle = DatabaseLifecycle {
    flavor: DbFlavor::Mariadb,
};

impl DatabaseLifecycle {
    fn data_dir(instance: &Instance<'_>) -> PathBuf {
        instance.install_dir.join("data")
    }

    fn bin(instance: &Instance<'_>, name: &str) -> PathBuf {
        instance.install_dir.join("bin").join(instance.exe_name(name))
    }

    fn install_db_script(&self, instance: &Instance<'_>) -> Option<PathBuf> {
        if self.flavor != DbFlavor::Mariadb {
            return None;
        }
        let name = instance.exe_name("mariadb-install-db");
        [
            instance.install_dir.join("bin").join(&name),
            instance.install_dir.join("scripts").join(&name),
        ]
        .into_iter()
        .find(|path| path.is_file())
    }

    fn with_defaults_file(instance: &Instance<'_>, command: CommandSpec, config: Option<PathBuf>) -> CommandSpec {
        // `--defaults-file` is only honored as the first argument.
        let command = match config.filter(|path| path.is_file()) {
            Some(path) => command.path_flag("defaults-file", &path),
            None => command,
        };
        command.current_dir(&instance.install_dir)
    }
}

impl Lifecycle for DatabaseLifecycle {
    fn process_names(&self, _instance: &Instance<'_>) -> Vec<String> {
        match self.flavor {
            DbFlavor::Mysql => vec!["mysqld".into(), "mariadbd".into()],
            DbFlavor::Mariadb => vec!["mariadbd".into(), "mysqld".into()],
        }
    }

    fn config_path(&self, instance: &Instance<'_>) -> Option<PathBuf> {
        let name = if instance.platform.is_windows() {
            "my.ini"
        } else {
            "my.cnf"
        };
        Some(instance.install_dir.join(name))
    }

    fn default_config(&self, instance: &Instance<'_>) -> Option<String> {
        let root = slashed(&instance.install_dir);
        Some(
            DATABASE_TEMPLATE
                .replace("{port}", &instance.port(DEFAULT_DB_PORT).to_string())
                .replace("{install}", &root),
        )
    }

    fn log_path(&self, instance: &Instance<'_>) -> Option<PathBuf> {
        let data = Self::data_dir(instance);
        let primary = data.join("error.log");
        if primary.exists() {
            return Some(primary);
        }
        let host = System::host_name().unwrap_or_else(|| "localhost".to_string());
        Some(data.join(format!("{host}.err")))
    }

    fn prepare(&self, instance: &Instance<'_>) -> io::Result<Option<CommandSpec>> {
        let data = Self::data_dir(instance);
        fs::create_dir_all(&data)?;

        let config = self.config_path(instance);
        if let Some(path) = &config
            && !path.exists()
        {
            let minimal = format!(
                "[mysqld]\nport={}\nbasedir={}\ndatadir={}\n",
                instance.port(DEFAULT_DB_PORT),
                slashed(&instance.install_dir),
                slashed(&data)
            );
            fs::write(path, minimal)?;
        }

        if data.join(DB_PRIMARY_DATA_FILE).exists() {
            return Ok(None);
        }

        // A half-initialized data directory makes the initializer refuse to run.
        fs::remove_dir_all(&data)?;
        fs::create_dir_all(&data)?;

        if let Some(script) = self.install_db_script(instance) {
            let mut command = CommandSpec::new(script);
            if !instance.platform.is_windows() {
                command = command.path_flag("basedir", &instance.install_dir);
            }
            return Ok(Some(
                command
                    .path_flag("datadir", &data)
                    .current_dir(&instance.install_dir),
            ));
        }

        let server = self
            .executable(instance)
            .unwrap_or_else(|_| Self::bin(instance, "mysqld"));
        let command = Self::with_defaults_file(instance, CommandSpec::new(server), config)
            .arg("--initialize-insecure")
            .path_flag("basedir", &instance.install_dir)
            .path_flag("datadir", &data)
            .arg("--console");
        Ok(Some(command))
    }

    fn start_command(&self, instance: &Instance<'_>, executable: &Path) -> CommandSpec {
        Self::with_defaults_file(
            instance,
            CommandSpec::new(executable),
            self.config_path(instance),
        )
        .path_flag("basedir", &instance.install_dir)
        .path_flag("datadir", &Self::data_dir(instance))
        .arg(format!("--port={}", instance.port(DEFAULT_DB_PORT)))
        .arg("--console")
    }

    fn stop_command(&self, instance: &Instance<'_>) -> Option<CommandSpec> {
        let mariadb_admin = Self::bin(instance, "mariadb-admin");
        let admin = if self.flavor == DbFlavor::Mariadb && mariadb_admin.is_file() {
            mariadb_admin
        } else {
            Self::bin(instance, "mysqladmin")
        };
        Some(
            CommandSpec::new(admin)
                .arg("-u")
                .arg("root")
                .arg("--host=127.0.0.1")
                .arg(format!("--port={}", instance.port(DEFAULT_DB_PORT)))
                .arg("shutdown")
                .current_dir(&instance.install_dir),
        )
    }
}

/// Nginx web server.
#[derive(Debug)]
pub struct NginxLifecycle;

impl NginxLifecycle {
    fn with_prefix(instance: &Instance<'_>, command: CommandSpec) -> CommandSpec {
        let command = command.arg("-p").arg(instance.install_dir.as_os_str());
        if instance.platform.is_windows() {
            command
        } else {
            command
                .arg("-c")
                .arg(instance.path("conf/nginx.conf").as_os_str())
        }
    }
}

impl Lifecycle for NginxLifecycle {
    fn process_names(&self, _instance: &Instance<'_>) -> Vec<String> {
        vec!["nginx".into()]
    }

    fn config_path(&self, instance: &Instance<'_>) -> Option<PathBuf> {
        Some(instance.path("conf/nginx.conf"))
    }

    fn default_config(&self, instance: &Instance<'_>) -> Option<String> {
        Some(
            NGINX_TEMPLATE
                .replace("{install}", &slashed(&instance.install_dir))
                .replace("{fastcgi}", FASTCGI_BIND),
        )
    }

    fn log_path(&self, instance: &Instance<'_>) -> Option<PathBuf> {
        Some(instance.path("logs/error.log"))
    }

    fn prepare(&self, instance: &Instance<'_>) -> io::Result<Option<CommandSpec>> {
        for dir in ["logs", "temp"] {
            fs::create_dir_all(instance.install_dir.join(dir))?;
        }
        Ok(None)
    }

    fn start_command(&self, instance: &Instance<'_>, executable: &Path) -> CommandSpec {
        Self::with_prefix(instance, CommandSpec::new(executable)).current_dir(&instance.install_dir)
    }

    fn stop_command(&self, instance: &Instance<'_>) -> Option<CommandSpec> {
        let executable = instance.catalog_executable().ok()?;
        let command = CommandSpec::new(executable).arg("-s").arg("stop");
        Some(Self::with_prefix(instance, command).current_dir(&instance.install_dir))
    }
}

/// Redis server.
#[derive(Debug)]
pub struct RedisLifecycle;

impl Lifecycle for RedisLifecycle {
    fn process_names(&self, _instance: &Instance<'_>) -> Vec<String> {
        vec!["redis-server".into()]
    }

    fn config_path(&self, instance: &Instance<'_>) -> Option<PathBuf> {
        Some(instance.install_dir.join("redis.conf"))
    }

    fn default_config(&self, instance: &Instance<'_>) -> Option<String> {
        Some(REDIS_TEMPLATE.replace("{port}", &instance.port(DEFAULT_REDIS_PORT).to_string()))
    }

    fn log_path(&self, instance: &Instance<'_>) -> Option<PathBuf> {
        Some(instance.install_dir.join("redis-server.log"))
    }

    fn prepare(&self, instance: &Instance<'_>) -> io::Result<Option<CommandSpec>> {
        if let Some(path) = self.config_path(instance)
            && !path.exists()
        {
            fs::write(
                &path,
                format!("bind 127.0.0.1\nport {}\n", instance.port(DEFAULT_REDIS_PORT)),
            )?;
        }
        Ok(None)
    }

    fn start_command(&self, instance: &Instance<'_>, executable: &Path) -> CommandSpec {
        let mut command = CommandSpec::new(executable).current_dir(&instance.install_dir);
        if let Some(config) = self.config_path(instance) {
            command = command.arg(config.as_os_str());
        }
        command
    }

    fn stop_command(&self, instance: &Instance<'_>) -> Option<CommandSpec> {
        let server = instance.catalog_executable().ok()?;
        let cli = server
            .parent()
            .unwrap_or(&instance.install_dir)
            .join(instance.exe_name("redis-cli"));
        Some(
            CommandSpec::new(cli)
                .arg("-p")
                .arg(instance.port(DEFAULT_REDIS_PORT).to_string())
                .arg("shutdown")
                .current_dir(&instance.install_dir),
        )
    }
}

/// PHP served through a FastCGI listener.
#[derive(Debug)]
pub struct PhpFastcgiLifecycle;

impl Lifecycle for PhpFastcgiLifecycle {
    fn process_names(&self, _instance: &Instance<'_>) -> Vec<String> {
        vec!["php-cgi".into()]
    }

    fn config_path(&self, instance: &Instance<'_>) -> Option<PathBuf> {
        Some(instance.install_dir.join("php.ini"))
    }

    fn default_config(&self, instance: &Instance<'_>) -> Option<String> {
        let error_log = slashed(&instance.install_dir.join("php_errors.log"));
        Some(PHP_TEMPLATE.replace("{error_log}", &error_log))
    }

    fn log_path(&self, instance: &Instance<'_>) -> Option<PathBuf> {
        Some(instance.install_dir.join("php_errors.log"))
    }

    /// The CLI binary in the catalog cannot serve FastCGI; launch `php-cgi`.
    fn executable(&self, instance: &Instance<'_>) -> Result<PathBuf, VisorError> {
        if instance.platform.is_windows() {
            Ok(instance.install_dir.join("php-cgi.exe"))
        } else {
            Ok(instance.path("bin/php-cgi"))
        }
    }

    fn start_command(&self, instance: &Instance<'_>, executable: &Path) -> CommandSpec {
        let mut command = CommandSpec::new(executable).arg("-b").arg(FASTCGI_BIND);
        if let Some(config) = self.config_path(instance).filter(|path| path.is_file()) {
            command = command.arg("-c").arg(config.as_os_str());
        }
        command.current_dir(&instance.install_dir)
    }
}

/// Runtimes and tools: nothing to launch or stop.
#[derive(Debug)]
pub struct PassiveLifecycle;

impl Lifecycle for PassiveLifecycle {
    fn is_daemon(&self) -> bool {
        false
    }

    fn process_names(&self, _instance: &Instance<'_>) -> Vec<String> {
        Vec::new()
    }
}

/// Any other package: launch the bare executable, stop by process name.
#[derive(Debug)]
pub struct GenericLifecycle;

impl Lifecycle for GenericLifecycle {
    fn process_names(&self, instance: &Instance<'_>) -> Vec<String> {
        let mut names = Vec::new();
        if let Some(stem) = instance
            .package
            .executable_for(instance.platform)
            .and_then(|relative| Path::new(relative).file_stem())
        {
            names.push(stem.to_string_lossy().into_owned());
        }
        if !names.contains(&instance.package.id) {
            names.push(instance.package.id.clone());
        }
        names
    }
}

const NGINX_TEMPLATE: &str = r#"worker_processes 1;

events {
    worker_connections 1024;
}

http {
    include       mime.types;
    default_type  application/octet-stream;
    sendfile      on;
    keepalive_timeout 65;

    server {
        listen       80;
        server_name  localhost;

        root   {install}/html;
        index  index.html index.htm index.php;

        location / {
            try_files $uri $uri/ =404;
        }

        location ~ \.php$ {
            fastcgi_pass   {fastcgi};
            fastcgi_index  index.php;
            fastcgi_param  SCRIPT_FILENAME  $document_root$fastcgi_script_name;
            include        fastcgi_params;
        }
    }
}
"#;

const DATABASE_TEMPLATE: &str = "[mysqld]
port={port}
basedir={install}
datadir={install}/data
socket={install}/mysql.sock
log-error={install}/data/error.log
pid-file={install}/mysql.pid

[client]
port={port}
socket={install}/mysql.sock
";

const REDIS_TEMPLATE: &str = "bind 127.0.0.1
port {port}
daemonize no
loglevel notice
logfile \"redis-server.log\"
databases 16
save 900 1
save 300 10
save 60 10000
";

const PHP_TEMPLATE: &str = "[PHP]
engine = On
short_open_tag = Off
precision = 14
output_buffering = 4096
zlib.output_compression = Off
implicit_flush = Off
serialize_precision = -1
disable_functions =
disable_classes =
zend.enable_gc = On
expose_php = Off
max_execution_time = 30
max_input_time = 60
memory_limit = 256M
error_reporting = E_ALL
display_errors = Off
display_startup_errors = Off
log_errors = On
error_log = \"{error_log}\"
post_max_size = 128M
upload_max_filesize = 128M
max_file_uploads = 20
date.timezone = UTC
cgi.fix_pathinfo=1

[Session]
session.save_handler = files
session.use_strict_mode = 1
session.use_cookies = 1
session.use_only_cookies = 1
session.name = PHPSESSID
session.auto_start = 0
session.cookie_lifetime = 0
session.gc_maxlifetime = 1440
";
