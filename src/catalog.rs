//! Registry of installable packages and download resolution.
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, fs, path::Path};
use strum_macros::{AsRefStr, EnumString};

use crate::error::VisorError;

/// Wildcard download key for platform-independent archives.
pub const ANY_PLATFORM: &str = "all";

/// Operating system and architecture in the catalog's `{os}/{arch}` naming.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Platform {
    /// `linux`, `windows`, `darwin`, ...
    pub os: String,
    /// `amd64`, `arm64`, `386`, ...
    pub arch: String,
}

impl Platform {
    /// Creates a platform from explicit catalog names.
    pub fn new(os: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            arch: arch.into(),
        }
    }

    /// The platform this binary was compiled for.
    pub fn current() -> Self {
        let os = match std::env::consts::OS {
            "macos" => "darwin",
            other => other,
        };
        let arch = match std::env::consts::ARCH {
            "x86_64" => "amd64",
            "aarch64" => "arm64",
            "x86" => "386",
            other => other,
        };
        Self::new(os, arch)
    }

    /// Download key, e.g. `linux/amd64`.
    pub fn key(&self) -> String {
        format!("{}/{}", self.os, self.arch)
    }

    /// Whether executables carry an `.exe` suffix.
    pub fn is_windows(&self) -> bool {
        self.os == "windows"
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.arch)
    }
}

/// Lifecycle strategy a package is supervised with.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ServiceFamily {
    /// MySQL server daemon.
    Mysql,
    /// MariaDB server daemon.
    Mariadb,
    /// Nginx web server.
    Nginx,
    /// Redis in-memory store.
    Redis,
    /// PHP FastCGI gateway.
    PhpFastcgi,
    /// Language runtime; "running" means the interpreter is present.
    Runtime,
    /// CLI tool or web add-on with no process of its own.
    Tool,
    /// Anything else: spawn the bare executable.
    #[default]
    Generic,
}

/// A single downloadable version of a package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionDescriptor {
    /// Version string, unique within its package.
    pub version: String,
    /// Marks the recommended version.
    #[serde(default, skip_serializing_if = "is_false")]
    pub latest: bool,
    /// Marks a long-term-support version.
    #[serde(default, skip_serializing_if = "is_false")]
    pub lts: bool,
    /// `{os}/{arch}` or `all` mapped to a download URL.
    pub downloads: BTreeMap<String, String>,
    /// Optional sha256 hex digests keyed like `downloads`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub checksums: BTreeMap<String, String>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Immutable catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageDescriptor {
    /// Unique key.
    pub id: String,
    /// Display name.
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// `database`, `runtime`, `webserver`, `tools`, ...
    pub category: String,
    /// Relative directory under the base dir, e.g. `database/mysql`.
    pub install_subpath: String,
    /// Operating system mapped to the executable's path inside the instance.
    #[serde(default)]
    pub executable: BTreeMap<String, String>,
    /// Config file path inside the instance, if the package has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_file: Option<String>,
    /// Network ports, primary first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<u16>,
    /// Lifecycle strategy.
    #[serde(default)]
    pub family: ServiceFamily,
    /// Ordered versions, newest first.
    pub versions: Vec<VersionDescriptor>,
}

impl PackageDescriptor {
    /// Looks up one version.
    pub fn version(&self, version: &str) -> Option<&VersionDescriptor> {
        self.versions.iter().find(|v| v.version == version)
    }

    /// Executable relative path for `platform`, if defined.
    pub fn executable_for(&self, platform: &Platform) -> Option<&str> {
        self.executable.get(&platform.os).map(String::as_str)
    }

    /// First declared port.
    pub fn primary_port(&self) -> Option<u16> {
        self.ports.first().copied()
    }
}

/// A resolved download for one (package, version, platform).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedDownload {
    /// Download URL.
    pub url: String,
    /// The catalog key that matched (`linux/amd64` or `all`).
    pub key: String,
    /// Expected sha256 digest, if the catalog records one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

impl ResolvedDownload {
    /// File name of the download, taken from the last URL path segment.
    pub fn file_name(&self) -> String {
        let without_fragment = self.url.split('#').next().unwrap_or(&self.url);
        let without_query = without_fragment
            .split('?')
            .next()
            .unwrap_or(without_fragment);
        without_query
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
            .unwrap_or("download")
            .to_string()
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CatalogFile {
    List(Vec<PackageDescriptor>),
    Wrapped { packages: Vec<PackageDescriptor> },
}

/// Read-only registry of packages, built once and shared by reference.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    packages: Vec<PackageDescriptor>,
}

impl Catalog {
    /// Builds a catalog from descriptors; later duplicates replace earlier ids.
    pub fn new(packages: Vec<PackageDescriptor>) -> Self {
        let mut catalog = Self::default();
        for package in packages {
            catalog.upsert(package);
        }
        catalog
    }

    fn upsert(&mut self, package: PackageDescriptor) {
        match self.packages.iter_mut().find(|p| p.id == package.id) {
            Some(existing) => *existing = package,
            None => self.packages.push(package),
        }
    }

    /// Returns a new catalog with `other`'s packages merged over this one.
    pub fn overlay(&self, other: Catalog) -> Catalog {
        let mut merged = self.clone();
        for package in other.packages {
            merged.upsert(package);
        }
        merged
    }

    /// Loads a catalog file (JSON or YAML, a list or `{packages: [...]}`).
    pub fn from_file(path: &Path) -> Result<Self, VisorError> {
        let content =
            fs::read_to_string(path).map_err(|source| VisorError::SettingsReadError {
                path: path.to_path_buf(),
                source,
            })?;
        let parsed: CatalogFile = serde_yaml::from_str(&content).map_err(|source| {
            VisorError::SettingsParseError {
                path: path.to_path_buf(),
                source,
            }
        })?;
        let packages = match parsed {
            CatalogFile::List(packages) => packages,
            CatalogFile::Wrapped { packages } => packages,
        };
        Ok(Self::new(packages))
    }

    /// All packages in declaration order.
    pub fn packages(&self) -> &[PackageDescriptor] {
        &self.packages
    }

    /// Packages in `category`; `all` or an empty string returns everything.
    pub fn by_category(&self, category: &str) -> Vec<&PackageDescriptor> {
        self.packages
            .iter()
            .filter(|p| category.is_empty() || category == "all" || p.category == category)
            .collect()
    }

    /// Distinct categories in declaration order.
    pub fn categories(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for package in &self.packages {
            if !seen.contains(&package.category.as_str()) {
                seen.push(package.category.as_str());
            }
        }
        seen
    }

    /// Looks up a package by id.
    pub fn get(&self, id: &str) -> Option<&PackageDescriptor> {
        self.packages.iter().find(|p| p.id == id)
    }

    /// Looks up a package by id or fails with `PackageNotFound`.
    pub fn require(&self, id: &str) -> Result<&PackageDescriptor, VisorError> {
        self.get(id).ok_or_else(|| VisorError::PackageNotFound {
            package: id.to_string(),
        })
    }

    /// Picks the download for `platform`: the exact `{os}/{arch}` key first,
    /// then the `all` wildcard.
    pub fn resolve(
        &self,
        package_id: &str,
        version: &str,
        platform: &Platform,
    ) -> Result<ResolvedDownload, VisorError> {
        let package = self.require(package_id)?;
        let descriptor =
            package
                .version(version)
                .ok_or_else(|| VisorError::VersionNotFound {
                    package: package_id.to_string(),
                    version: version.to_string(),
                })?;

        let platform_key = platform.key();
        for key in [platform_key.as_str(), ANY_PLATFORM] {
            if let Some(url) = descriptor.downloads.get(key) {
                return Ok(ResolvedDownload {
                    url: url.clone(),
                    key: key.to_string(),
                    sha256: descriptor.checksums.get(key).cloned(),
                });
            }
        }

        Err(VisorError::NoDownloadForPlatform {
            package: package_id.to_string(),
            version: version.to_string(),
            platform: platform_key,
        })
    }

    /// The catalog shipped with pkgvisor.
    pub fn builtin() -> Self {
        Self::new(builtin_packages())
    }
}

fn downloads(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
    entries
        .iter()
        .map(|(key, url)| (key.to_string(), url.to_string()))
        .collect()
}

fn executables(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
    downloads(entries)
}

fn version(
    version: &str,
    latest: bool,
    lts: bool,
    entries: &[(&str, &str)],
) -> VersionDescriptor {
    VersionDescriptor {
        version: version.to_string(),
        latest,
        lts,
        downloads: downloads(entries),
        checksums: BTreeMap::new(),
    }
}

#[allow(clippy::too_many_arguments)]
fn package(
    id: &str,
    name: &str,
    description: &str,
    category: &str,
    install_subpath: &str,
    family: ServiceFamily,
    executable: BTreeMap<String, String>,
    config_file: Option<&str>,
    ports: &[u16],
    versions: Vec<VersionDescriptor>,
) -> PackageDescriptor {
    PackageDescriptor {
        id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        category: category.to_string(),
        install_subpath: install_subpath.to_string(),
        executable,
        config_file: config_file.map(str::to_string),
        ports: ports.to_vec(),
        family,
        versions,
    }
}

fn builtin_packages() -> Vec<PackageDescriptor> {
    vec![
        package(
            "mysql",
            "MySQL Server",
            "Open-source relational database",
            "database",
            "database/mysql",
            ServiceFamily::Mysql,
            executables(&[
                ("windows", "bin/mysqld.exe"),
                ("linux", "bin/mysqld"),
                ("darwin", "bin/mysqld"),
            ]),
            Some("my.cnf"),
            &[3306],
            vec![
                version(
                    "8.0.35",
                    true,
                    false,
                    &[
                        (
                            "windows/amd64",
                            "https://dev.mysql.com/get/Downloads/MySQL-8.0/mysql-8.0.35-winx64.zip",
                        ),
                        (
                            "linux/amd64",
                            "https://dev.mysql.com/get/Downloads/MySQL-8.0/mysql-8.0.35-linux-glibc2.17-x86_64.tar.xz",
                        ),
                    ],
                ),
                version(
                    "5.7.44",
                    false,
                    false,
                    &[
                        (
                            "windows/amd64",
                            "https://dev.mysql.com/get/Downloads/MySQL-5.7/mysql-5.7.44-winx64.zip",
                        ),
                        (
                            "linux/amd64",
                            "https://dev.mysql.com/get/Downloads/MySQL-5.7/mysql-5.7.44-linux-glibc2.12-x86_64.tar.gz",
                        ),
                    ],
                ),
            ],
        ),
        package(
            "mariadb",
            "MariaDB",
            "Community-developed MySQL fork",
            "database",
            "database/mariadb",
            ServiceFamily::Mariadb,
            executables(&[
                ("windows", "bin/mariadbd.exe"),
                ("linux", "bin/mariadbd"),
                ("darwin", "bin/mariadbd"),
            ]),
            Some("my.cnf"),
            &[3306],
            vec![
                version(
                    "11.2.2",
                    true,
                    false,
                    &[
                        (
                            "windows/amd64",
                            "https://archive.mariadb.org/mariadb-11.2.2/winx64-packages/mariadb-11.2.2-winx64.zip",
                        ),
                        (
                            "linux/amd64",
                            "https://archive.mariadb.org/mariadb-11.2.2/bintar-linux-systemd-x86_64/mariadb-11.2.2-linux-systemd-x86_64.tar.gz",
                        ),
                    ],
                ),
                version(
                    "10.11.6",
                    false,
                    true,
                    &[
                        (
                            "windows/amd64",
                            "https://archive.mariadb.org/mariadb-10.11.6/winx64-packages/mariadb-10.11.6-winx64.zip",
                        ),
                        (
                            "linux/amd64",
                            "https://archive.mariadb.org/mariadb-10.11.6/bintar-linux-systemd-x86_64/mariadb-10.11.6-linux-systemd-x86_64.tar.gz",
                        ),
                    ],
                ),
            ],
        ),
        package(
            "redis",
            "Redis",
            "In-memory data structure store",
            "database",
            "database/redis",
            ServiceFamily::Redis,
            executables(&[
                ("windows", "redis-server.exe"),
                ("linux", "src/redis-server"),
                ("darwin", "src/redis-server"),
            ]),
            Some("redis.conf"),
            &[6379],
            vec![version(
                "7.2.3",
                true,
                false,
                &[
                    (
                        "windows/amd64",
                        "https://github.com/tporadowski/redis/releases/download/v7.2.3/Redis-7.2.3-Windows-x64.zip",
                    ),
                    ("linux/amd64", "https://download.redis.io/releases/redis-7.2.3.tar.gz"),
                ],
            )],
        ),
        package(
            "php",
            "PHP",
            "Server-side scripting language",
            "runtime",
            "runtime/php",
            ServiceFamily::PhpFastcgi,
            executables(&[
                ("windows", "php.exe"),
                ("linux", "bin/php"),
                ("darwin", "bin/php"),
            ]),
            Some("php.ini"),
            &[9000],
            vec![
                version(
                    "8.4.16",
                    true,
                    false,
                    &[(
                        "windows/amd64",
                        "https://windows.php.net/downloads/releases/php-8.4.16-nts-Win32-vs17-x64.zip",
                    )],
                ),
                version(
                    "8.3.29",
                    false,
                    false,
                    &[(
                        "windows/amd64",
                        "https://windows.php.net/downloads/releases/php-8.3.29-nts-Win32-vs16-x64.zip",
                    )],
                ),
                version(
                    "8.2.30",
                    false,
                    false,
                    &[(
                        "windows/amd64",
                        "https://windows.php.net/downloads/releases/php-8.2.30-nts-Win32-vs16-x64.zip",
                    )],
                ),
                version(
                    "8.1.34",
                    false,
                    false,
                    &[(
                        "windows/amd64",
                        "https://windows.php.net/downloads/releases/php-8.1.34-nts-Win32-vs16-x64.zip",
                    )],
                ),
            ],
        ),
        package(
            "nodejs",
            "Node.js",
            "JavaScript runtime",
            "runtime",
            "runtime/nodejs",
            ServiceFamily::Runtime,
            executables(&[
                ("windows", "node.exe"),
                ("linux", "bin/node"),
                ("darwin", "bin/node"),
            ]),
            None,
            &[],
            vec![
                version(
                    "20.10.0",
                    true,
                    true,
                    &[
                        ("windows/amd64", "https://nodejs.org/dist/v20.10.0/node-v20.10.0-win-x64.zip"),
                        (
                            "linux/amd64",
                            "https://nodejs.org/dist/v20.10.0/node-v20.10.0-linux-x64.tar.xz",
                        ),
                        (
                            "darwin/amd64",
                            "https://nodejs.org/dist/v20.10.0/node-v20.10.0-darwin-x64.tar.gz",
                        ),
                        (
                            "darwin/arm64",
                            "https://nodejs.org/dist/v20.10.0/node-v20.10.0-darwin-arm64.tar.gz",
                        ),
                    ],
                ),
                version(
                    "18.19.0",
                    false,
                    true,
                    &[
                        ("windows/amd64", "https://nodejs.org/dist/v18.19.0/node-v18.19.0-win-x64.zip"),
                        (
                            "linux/amd64",
                            "https://nodejs.org/dist/v18.19.0/node-v18.19.0-linux-x64.tar.xz",
                        ),
                        (
                            "darwin/amd64",
                            "https://nodejs.org/dist/v18.19.0/node-v18.19.0-darwin-x64.tar.gz",
                        ),
                    ],
                ),
            ],
        ),
        package(
            "nginx",
            "Nginx",
            "High-performance web server",
            "webserver",
            "webserver/nginx",
            ServiceFamily::Nginx,
            executables(&[
                ("windows", "nginx.exe"),
                ("linux", "sbin/nginx"),
                ("darwin", "sbin/nginx"),
            ]),
            Some("conf/nginx.conf"),
            &[80, 443],
            vec![
                version(
                    "1.25.3",
                    true,
                    false,
                    &[
                        ("windows/amd64", "https://nginx.org/download/nginx-1.25.3.zip"),
                        ("linux/amd64", "https://nginx.org/download/nginx-1.25.3.tar.gz"),
                    ],
                ),
                version(
                    "1.24.0",
                    false,
                    false,
                    &[
                        ("windows/amd64", "https://nginx.org/download/nginx-1.24.0.zip"),
                        ("linux/amd64", "https://nginx.org/download/nginx-1.24.0.tar.gz"),
                    ],
                ),
            ],
        ),
        package(
            "phpmyadmin",
            "phpMyAdmin",
            "MySQL web administration tool",
            "tools",
            "addons/phpmyadmin",
            ServiceFamily::Tool,
            BTreeMap::new(),
            None,
            &[],
            vec![version(
                "5.2.1",
                true,
                false,
                &[(
                    ANY_PLATFORM,
                    "https://files.phpmyadmin.net/phpMyAdmin/5.2.1/phpMyAdmin-5.2.1-all-languages.zip",
                )],
            )],
        ),
        package(
            "adminer",
            "Adminer",
            "Lightweight database management",
            "tools",
            "addons/adminer",
            ServiceFamily::Tool,
            BTreeMap::new(),
            None,
            &[],
            vec![version(
                "4.8.1",
                true,
                false,
                &[(
                    ANY_PLATFORM,
                    "https://github.com/vrana/adminer/releases/download/v4.8.1/adminer-4.8.1.php",
                )],
            )],
        ),
        package(
            "composer",
            "Composer",
            "PHP dependency manager",
            "tools",
            "addons/composer",
            ServiceFamily::Tool,
            executables(&[
                ("windows", "composer.phar"),
                ("linux", "composer.phar"),
                ("darwin", "composer.phar"),
            ]),
            None,
            &[],
            vec![version(
                "2.6.6",
                true,
                false,
                &[(ANY_PLATFORM, "https://getcomposer.org/download/2.6.6/composer.phar")],
            )],
        ),
    ]
}
