//! The database engine recipe.
//!
//! This build is told two stories about its directory layout. At configure
//! time the extension directories (`datadir`, `libdir`) point at the shared
//! qualified trees under the global prefix, so those are the paths compiled
//! into the binaries and reported by `pg_config`. At install time the same
//! variables are overridden to paths inside the keg, the only place the build
//! writes. The link step afterwards makes the compiled-in paths resolve.
//!
//! Because the shared trees carry the qualified name, extensions built
//! against this engine can link their own artifacts into the same
//! directories and get loaded at runtime.

use anyhow::{Context, Result};
use std::path::Path;

use crate::build::{BuildEnv, BuildSteps, std_configure_args};
use crate::check::{assert_contains, assert_output_eq};
use crate::fetch::Sha256Digest;
use crate::formula::{
    CheckContext, Dependency, Formula, FormulaName, InstallContext, Livecheck, Metadata,
    ServiceSpec,
};
use crate::layout::{LayoutRole, Phase};
use crate::process::{Invocation, output_line, run_checked};

#[derive(Debug)]
pub struct PostgresqlAt16;

fn name() -> FormulaName {
    FormulaName::new("postgresql", 16)
}

impl Formula for PostgresqlAt16 {
    fn metadata(&self) -> Metadata {
        Metadata {
            name: name(),
            desc: "Object-relational database system".to_string(),
            homepage: "https://www.postgresql.org/".to_string(),
            url: "https://ftp.postgresql.org/pub/source/v16.3/postgresql-16.3.tar.bz2"
                .to_string(),
            sha256: Sha256Digest::from_static(
                "331963d5d3dc4caf4216a049fa40b66d6bcb8c730615859411b9518764e60585",
            ),
            license: "PostgreSQL".to_string(),
            version: "16.3".to_string(),
            revision: 0,
            livecheck: Livecheck::new(
                "https://ftp.postgresql.org/pub/source/",
                r#"(?i)href=["']?v?(16(?:\.\d+)+)/?["' >]"#,
            ),
        }
    }

    fn dependencies(&self) -> Vec<Dependency> {
        vec![
            Dependency::build("pkg-config"),
            Dependency::runtime("gettext"),
            Dependency::runtime("icu4c"),
            // GSSAPI from the system Kerberos framework crashes when forked.
            Dependency::runtime("krb5"),
            Dependency::runtime("lz4"),
            Dependency::runtime("openssl@3"),
            Dependency::runtime("readline"),
            Dependency::runtime("zstd"),
            // Provided by the base system on macOS.
            Dependency::runtime("libxml2").linux_only(),
            Dependency::runtime("libxslt").linux_only(),
            Dependency::runtime("openldap").linux_only(),
            Dependency::runtime("perl").linux_only(),
            Dependency::runtime("linux-pam").linux_only(),
            Dependency::runtime("util-linux").linux_only(),
        ]
    }

    fn install(&self, ctx: &InstallContext<'_>) -> Result<()> {
        let name = name();
        let qualified = name.to_string();
        let layout = self.layout(&ctx.prefix, &ctx.keg);

        let mut env = BuildEnv::new();
        env.remove("PKG_CONFIG_LIBDIR");
        env.prepend(
            "LDFLAGS",
            format!(
                "-L{} -L{}",
                ctx.opt_lib("openssl@3").display(),
                ctx.opt_lib("readline").display()
            ),
        );
        env.prepend(
            "CPPFLAGS",
            format!(
                "-I{} -I{}",
                ctx.opt_include("openssl@3").display(),
                ctx.opt_include("readline").display()
            ),
        );
        // Extensions compiled against this engine need to find libintl.h.
        env.prepend("LDFLAGS", format!("-L{}", ctx.opt_lib("gettext").display()));
        env.prepend(
            "CPPFLAGS",
            format!("-I{}", ctx.opt_include("gettext").display()),
        );

        let datadir = layout.resolve(LayoutRole::Data, Phase::Configure);
        let libdir = layout.resolve(LayoutRole::Lib, Phase::Configure);
        let opt_include = ctx.opt_include(&qualified);

        let mut args = std_configure_args(&ctx.keg);
        args.extend([
            format!("--datadir={}", datadir.display()),
            format!("--libdir={}", libdir.display()),
            format!("--includedir={}", opt_include.display()),
            format!("--sysconfdir={}", ctx.etc().display()),
            format!("--docdir={}", ctx.keg_doc(&name).display()),
            "--enable-nls".to_string(),
            "--enable-thread-safety".to_string(),
            "--with-gssapi".to_string(),
            "--with-icu".to_string(),
            "--with-ldap".to_string(),
            "--with-libxml".to_string(),
            "--with-libxslt".to_string(),
            "--with-lz4".to_string(),
            "--with-zstd".to_string(),
            "--with-openssl".to_string(),
            "--with-pam".to_string(),
            "--with-perl".to_string(),
            "--with-uuid=e2fs".to_string(),
            "--with-extra-version= (kegrun)".to_string(),
        ]);
        if cfg!(target_os = "macos") {
            args.extend(["--with-bonjour".to_string(), "--with-tcl".to_string()]);
        }

        let steps = BuildSteps::new(ctx.runner, &ctx.build_dir, env);
        steps.configure(&args)?;

        // The makefiles derive pkglibdir from the prefix, which comes out
        // wrong for prefixes containing the string "postgres". It cannot be
        // set through ./configure, only as a make override.
        steps.make(&[
            format!("datadir={}", datadir.display()),
            format!("pkglibdir={}", libdir.display()),
            format!("pkgincludedir={}", opt_include.join("postgresql").display()),
            format!(
                "includedir_server={}",
                opt_include.join("postgresql/server").display()
            ),
        ])?;

        let install_datadir = layout.resolve(LayoutRole::Data, Phase::Install);
        let install_libdir = layout.resolve(LayoutRole::Lib, Phase::Install);
        let keg_include = ctx.keg.join("include");
        steps.make_install(
            "install-world",
            &[
                format!("datadir={}", install_datadir.display()),
                format!("libdir={}", install_libdir.display()),
                format!("pkglibdir={}", install_libdir.display()),
                format!("includedir={}", keg_include.display()),
                format!(
                    "pkgincludedir={}",
                    keg_include.join("postgresql").display()
                ),
                format!(
                    "includedir_server={}",
                    keg_include.join("postgresql/server").display()
                ),
                format!(
                    "includedir_internal={}",
                    keg_include.join("postgresql/internal").display()
                ),
            ],
        )?;
        Ok(())
    }

    fn post_install(&self, ctx: &InstallContext<'_>) -> Result<()> {
        let qualified = name().to_string();
        let datadir = ctx.var().join(&qualified);
        let log_dir = ctx.var().join("log");

        ctx.runtime
            .create_dir_all(&log_dir)
            .with_context(|| format!("Failed to create {}", log_dir.display()))?;
        ctx.runtime
            .create_dir_all(&datadir)
            .with_context(|| format!("Failed to create {}", datadir.display()))?;

        // Automated builds testing several majors side by side opt out of
        // cluster creation entirely; the clusters would clash.
        if ctx.runtime.env_var("KEGRUN_NO_INITDB").is_ok() {
            return Ok(());
        }

        // A cluster initialized by a previous revision keeps working; it is
        // never re-initialized.
        if ctx.runtime.exists(&datadir.join("PG_VERSION")) {
            return Ok(());
        }

        run_checked(
            ctx.runner,
            &Invocation::new(ctx.keg_bin().join("initdb").display().to_string())
                .arg("--locale=C")
                .arg("-E")
                .arg("UTF-8")
                .arg(datadir.display().to_string()),
        )?;
        Ok(())
    }

    fn service(&self, prefix: &Path) -> Option<ServiceSpec> {
        let qualified = name().to_string();
        let log = prefix.join("var/log").join(format!("{qualified}.log"));
        Some(ServiceSpec {
            run: vec![
                prefix
                    .join("opt")
                    .join(&qualified)
                    .join("bin/postgres")
                    .display()
                    .to_string(),
                "-D".to_string(),
                prefix.join("var").join(&qualified).display().to_string(),
            ],
            environment: vec![("LC_ALL".to_string(), "C".to_string())],
            keep_alive: true,
            log_path: log.clone(),
            error_log_path: log,
            working_dir: prefix.to_path_buf(),
        })
    }

    fn check(&self, ctx: &CheckContext<'_>) -> Result<()> {
        let qualified = name().to_string();
        let sharedir = ctx.prefix.join("share").join(&qualified);
        let libdir = ctx.prefix.join("lib").join(&qualified);
        let opt_include = ctx.opt_include(&qualified);
        let bin = ctx.keg.join("bin");

        run_checked(
            ctx.runner,
            &Invocation::new(bin.join("initdb").display().to_string())
                .arg(ctx.work_dir.join("test").display().to_string()),
        )?;

        let pg_config = |flag: &str| {
            output_line(
                ctx.runner,
                &Invocation::new(bin.join("pg_config").display().to_string()).arg(flag),
            )
        };

        // The compiled-in extension paths must be the shared qualified trees,
        // not keg paths.
        assert_output_eq(
            "sharedir",
            &sharedir.display().to_string(),
            &pg_config("--sharedir")?,
        )?;
        assert_output_eq(
            "pkglibdir",
            &libdir.display().to_string(),
            &pg_config("--pkglibdir")?,
        )?;
        assert_output_eq(
            "libdir",
            &libdir.display().to_string(),
            &pg_config("--libdir")?,
        )?;
        assert_output_eq(
            "pkgincludedir",
            &opt_include.join("postgresql").display().to_string(),
            &pg_config("--pkgincludedir")?,
        )?;
        assert_output_eq(
            "includedir-server",
            &opt_include.join("postgresql/server").display().to_string(),
            &pg_config("--includedir-server")?,
        )?;
        assert_contains(
            "cppflags",
            &format!("-I{}", ctx.opt_include("gettext").display()),
            &pg_config("--cppflags")?,
        )?;
        Ok(())
    }
}
