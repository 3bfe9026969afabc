//! Subcommand implementations.

use anyhow::{Context, Result, bail};
use log::{info, warn};
use serde::Serialize;
use std::path::PathBuf;
use tempfile::TempDir;

use crate::fetch::{fetch_source, unpack};
use crate::formula::{
    CheckContext, Dependency, Formula, InstallContext, Metadata, ServiceSpec, for_current_os,
};
use crate::formulae;
use crate::http::HttpClient;
use crate::layout::link_keg;
use crate::process::CommandRunner;
use crate::runtime::Runtime;

/// Resolved global paths for one invocation.
pub struct Paths {
    pub prefix: PathBuf,
    pub cellar: PathBuf,
}

impl Paths {
    /// CLI or environment overrides win; otherwise everything lives under
    /// `~/.kegrun`.
    pub fn resolve(
        runtime: &dyn Runtime,
        prefix: Option<PathBuf>,
        cellar: Option<PathBuf>,
    ) -> Result<Self> {
        let prefix = match prefix {
            Some(dir) => dir,
            None => runtime
                .home_dir()
                .context("Cannot determine the home directory")?
                .join(".kegrun/prefix"),
        };
        let cellar = cellar.unwrap_or_else(|| prefix.join("cellar"));
        Ok(Self { prefix, cellar })
    }

    /// The keg directory for a formula's current version.
    pub fn keg(&self, formula: &dyn Formula) -> PathBuf {
        let metadata = formula.metadata();
        self.cellar
            .join(metadata.name.to_string())
            .join(metadata.version_dir())
    }

    fn downloads(&self) -> PathBuf {
        self.cellar.join(".downloads")
    }
}

/// Build a formula from source into its keg, link it into the prefix, and
/// run its post-install step.
pub async fn install(
    runtime: &dyn Runtime,
    runner: &dyn CommandRunner,
    client: &HttpClient,
    paths: &Paths,
    name: &str,
    build_dir: Option<PathBuf>,
) -> Result<()> {
    let formula = formulae::find(name)?;
    let metadata = formula.metadata();
    let keg = paths.keg(formula.as_ref());
    if runtime.exists(&keg) {
        bail!(
            "{} {} is already installed at {}",
            metadata.name,
            metadata.version_dir(),
            keg.display()
        );
    }

    for dep in for_current_os(&formula.dependencies()) {
        let opt = paths.prefix.join("opt").join(&dep.name);
        if !runtime.exists(&opt) {
            warn!("Dependency {} not found at {}", dep.name, opt.display());
        }
    }

    // Keep a staged source tree alive for the duration of the build.
    let mut _staged: Option<TempDir> = None;
    let build_dir = match build_dir {
        Some(dir) => dir,
        None => {
            let archive = fetch_source(runtime, client, &metadata, &paths.downloads()).await?;
            let staging = tempfile::tempdir().context("Failed to create a staging directory")?;
            let root = unpack(runtime, &archive, staging.path())?;
            _staged = Some(staging);
            root
        }
    };

    runtime
        .create_dir_all(&keg)
        .with_context(|| format!("Failed to create keg {}", keg.display()))?;

    let ctx = InstallContext {
        runtime,
        runner,
        prefix: paths.prefix.clone(),
        keg: keg.clone(),
        build_dir,
    };
    info!("Building {} {} into {}", metadata.name, metadata.version_dir(), keg.display());
    if let Err(e) = formula.install(&ctx) {
        // A partial keg must never look installed.
        if let Err(cleanup) = runtime.remove_dir_all(&keg) {
            warn!("Failed to remove partial keg {}: {cleanup:#}", keg.display());
        }
        return Err(e);
    }

    let spec = formula.layout(&paths.prefix, &keg);
    let created = link_keg(runtime, &spec, &metadata.name.to_string(), &paths.cellar)?;
    info!("Linked {} ({created} symlinks)", metadata.name);

    formula.post_install(&ctx)?;
    info!(
        "Installed {} {} to {}",
        metadata.name,
        metadata.version_dir(),
        keg.display()
    );
    Ok(())
}

/// (Re-)link an installed keg into the prefix. Idempotent.
pub fn link(runtime: &dyn Runtime, paths: &Paths, name: &str) -> Result<usize> {
    let formula = formulae::find(name)?;
    let keg = paths.keg(formula.as_ref());
    if !runtime.is_dir(&keg) {
        bail!("{name} is not installed (no keg at {})", keg.display());
    }
    let spec = formula.layout(&paths.prefix, &keg);
    let created = link_keg(runtime, &spec, name, &paths.cellar)?;
    info!("Created {created} symlink(s) for {name}");
    Ok(created)
}

/// Run the post-install smoke tests for the given formulas. All of them run
/// even when an earlier one fails; the command fails if any did.
pub fn check(
    runtime: &dyn Runtime,
    runner: &dyn CommandRunner,
    paths: &Paths,
    names: &[String],
) -> Result<()> {
    let mut failures = Vec::new();
    for name in names {
        let formula = formulae::find(name)?;
        let keg = paths.keg(formula.as_ref());
        if !runtime.is_dir(&keg) {
            warn!("{name}: not installed (no keg at {})", keg.display());
            failures.push(name.clone());
            continue;
        }

        let work = tempfile::tempdir().context("Failed to create a scratch directory")?;
        let ctx = CheckContext {
            runtime,
            runner,
            prefix: paths.prefix.clone(),
            keg,
            work_dir: work.path().to_path_buf(),
        };
        match formula.check(&ctx) {
            Ok(()) => info!("{name}: ok"),
            Err(e) => {
                warn!("{name}: {e:#}");
                failures.push(name.clone());
            }
        }
    }

    if !failures.is_empty() {
        bail!("Checks failed for: {}", failures.join(", "));
    }
    Ok(())
}

/// Download and verify a formula's source archive without building it.
pub async fn fetch(
    runtime: &dyn Runtime,
    client: &HttpClient,
    paths: &Paths,
    name: &str,
) -> Result<PathBuf> {
    let formula = formulae::find(name)?;
    let archive = fetch_source(runtime, client, &formula.metadata(), &paths.downloads()).await?;
    info!("Fetched {}", archive.display());
    Ok(archive)
}

#[derive(Serialize)]
struct FormulaInfo {
    #[serde(flatten)]
    metadata: Metadata,
    dependencies: Vec<Dependency>,
    installed: bool,
    keg: PathBuf,
    service: Option<ServiceSpec>,
}

/// Render a formula's metadata, human-readable or as JSON.
pub fn info(runtime: &dyn Runtime, paths: &Paths, name: &str, json: bool) -> Result<String> {
    let formula = formulae::find(name)?;
    let metadata = formula.metadata();
    let keg = paths.keg(formula.as_ref());
    let installed = runtime.is_dir(&keg);

    if json {
        let payload = FormulaInfo {
            dependencies: formula.dependencies(),
            installed,
            keg,
            service: formula.service(&paths.prefix),
            metadata,
        };
        return serde_json::to_string_pretty(&payload).context("Failed to render JSON");
    }

    let deps: Vec<String> = formula
        .dependencies()
        .into_iter()
        .map(|d| d.name)
        .collect();
    let mut out = format!(
        "{}: {}\n{}\n{}\nFrom: {}\nLicense: {}\nDependencies: {}\n",
        metadata.name,
        metadata.version_dir(),
        metadata.desc,
        metadata.homepage,
        metadata.url,
        metadata.license,
        deps.join(", "),
    );
    if installed {
        out.push_str(&format!("Installed: {}\n", keg.display()));
    } else {
        out.push_str("Not installed\n");
    }
    Ok(out)
}

/// Report the newest upstream version against the packaged one.
pub async fn livecheck(client: &HttpClient, name: &str) -> Result<String> {
    let formula = formulae::find(name)?;
    let metadata = formula.metadata();
    let body = client.get_text(&metadata.livecheck.url).await?;
    match metadata.livecheck.latest(&body)? {
        Some(latest) => Ok(format!(
            "{}: packaged {}, latest upstream {}",
            metadata.name, metadata.version, latest
        )),
        None => bail!(
            "No version candidates found at {}",
            metadata.livecheck.url
        ),
    }
}
