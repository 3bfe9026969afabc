//! The geospatial extension recipe, built against a pinned engine major.
//!
//! This package cannot keep its artifacts to itself: its SQL scripts and
//! loadable modules must be linked into the engine's shared qualified trees
//! (`share/postgresql@16/contrib/...`, `lib/postgresql@16`) or the engine
//! never finds them. Its executables and man pages, on the other hand, would
//! collide with sibling builds for other engine majors, so they are renamed
//! with the engine major as a suffix before linking.
//!
//! The build system assumes it is installed next to the engine and resolves
//! the `postgres` executable relative to its own bindir; it links against
//! that binary for symbols the public libraries do not export. A scoped
//! alias satisfies the assumption for the duration of the build.

use anyhow::{Context, Result, bail};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use std::path::Path;

use crate::build::{BinaryAlias, BuildEnv, BuildSteps, alias, disambiguate, std_configure_args};
use crate::check::{ClusterGuard, assert_contains, assert_matches, free_port};
use crate::fetch::Sha256Digest;
use crate::formula::{
    CheckContext, Dependency, Formula, FormulaName, InstallContext, Livecheck, Metadata,
};
use crate::layout::{LayoutRole, LayoutSpec, Phase};
use crate::process::{Invocation, output_line, run_checked};

#[derive(Debug)]
pub struct PostgisAt16;

fn name() -> FormulaName {
    FormulaName::new("postgis", 16)
}

/// The engine this build compiles and links against. Shared trees resolve
/// against this name, not the extension's own.
fn engine() -> FormulaName {
    FormulaName::new("postgresql", 16)
}

/// Helper scripts shipped alongside the extension binaries.
const EXTENSION_SCRIPTS: &[&str] = &[
    "utils/create_upgrade.pl",
    "utils/postgis_restore.pl",
    "utils/profile_intersects.pl",
    "utils/test_estimation.pl",
    "utils/test_geography_estimation.pl",
    "utils/test_geography_joinestimation.pl",
    "utils/test_joinestimation.pl",
];

impl Formula for PostgisAt16 {
    fn metadata(&self) -> Metadata {
        Metadata {
            name: name(),
            desc: "Adds support for geographic objects to PostgreSQL".to_string(),
            homepage: "https://postgis.net/".to_string(),
            url: "https://download.osgeo.org/postgis/source/postgis-3.4.2.tar.gz".to_string(),
            sha256: Sha256Digest::from_static(
                "c8c874c00ba4a984a87030af6bf9544821502060ad473d5c96f1d4d0835c5892",
            ),
            license: "GPL-2.0-or-later".to_string(),
            version: "3.4.2".to_string(),
            revision: 2,
            livecheck: Livecheck::new(
                "https://download.osgeo.org/postgis/source/",
                r"(?i)href=.*?postgis[._-]v?(\d+(?:\.\d+)+)\.t",
            ),
        }
    }

    fn dependencies(&self) -> Vec<Dependency> {
        vec![
            Dependency::build("gpp"),
            Dependency::build("pkg-config"),
            // GeoJSON and raster handling.
            Dependency::runtime("gdal"),
            Dependency::runtime("geos"),
            Dependency::runtime("icu4c"),
            Dependency::runtime("json-c"),
            Dependency::runtime("pcre2"),
            Dependency::runtime(engine().to_string()),
            Dependency::runtime("proj"),
            // Map vector tile support.
            Dependency::runtime("protobuf-c"),
            // Advanced 2D/3D functions.
            Dependency::runtime("sfcgal"),
        ]
    }

    fn layout(&self, prefix: &Path, keg: &Path) -> LayoutSpec {
        // Shared roles resolve against the engine's qualified name so both
        // packages agree on one tree; the SQL data stays qualified inside
        // the keg as well.
        LayoutSpec::new(prefix, keg, engine().to_string()).with_private_role(LayoutRole::Data)
    }

    fn install(&self, ctx: &InstallContext<'_>) -> Result<()> {
        let engine = engine();
        let engine_qualified = engine.to_string();
        let layout = self.layout(&ctx.prefix, &ctx.keg);

        let mut env = BuildEnv::new();
        // The makefiles are not parallel-safe.
        env.deparallelize();
        env.prepend("CXXFLAGS", "-std=c++17");
        // protobuf-c's generator rejects the proto edition its own protoc
        // emits; use the protobuf compiler directly.
        env.set(
            "PROTOCC",
            ctx.opt_bin("protobuf").join("protoc").display().to_string(),
        );

        // The alias lives for the whole build; a build failure below still
        // removes it on unwind.
        let postgres = ctx.opt_bin(&engine_qualified).join("postgres");
        let postgres_alias = BinaryAlias::create(ctx.runtime, &postgres, &ctx.keg_bin())?;

        let mut args = vec![
            format!("--with-projdir={}", ctx.opt_prefix("proj").display()),
            format!("--with-jsondir={}", ctx.opt_prefix("json-c").display()),
            format!(
                "--with-pgconfig={}",
                ctx.opt_bin(&engine_qualified).join("pg_config").display()
            ),
            format!(
                "--with-protobufdir={}",
                ctx.opt_bin("protobuf-c").display()
            ),
            // NLS support inherits all compiler flags from the engine's PGXS
            // makefiles, which cannot be pointed at a keg-only gettext.
            "--disable-nls".to_string(),
        ];
        args.extend(std_configure_args(&ctx.keg));

        let steps = BuildSteps::new(ctx.runner, &ctx.build_dir, env);
        steps.configure(&args)?;
        steps.make(&[])?;

        // PGXS hardcodes install paths pointing at the engine; override
        // every one of them back into this keg.
        let datadir = layout.resolve(LayoutRole::Data, Phase::Install);
        let pkglibdir = layout.resolve(LayoutRole::Lib, Phase::Install);
        steps.make_install(
            "install",
            &[
                format!("bindir={}", ctx.keg_bin().display()),
                format!("docdir={}", ctx.keg_doc(&name()).display()),
                format!("mandir={}", ctx.keg.join("share/man").display()),
                format!("pkglibdir={}", pkglibdir.display()),
                format!("datadir={}", datadir.display()),
                format!("PG_SHAREDIR={}", datadir.display()),
            ],
        )?;

        postgres_alias.remove()?;
        // Belt and braces: a foreign executable must never ship.
        alias::remove_stale(ctx.runtime, &ctx.keg_bin(), "postgres");

        for script in EXTENSION_SCRIPTS {
            let source = ctx.build_dir.join(script);
            let file_name = Path::new(script)
                .file_name()
                .with_context(|| format!("No file name in {script:?}"))?;
            let dest = ctx.keg_bin().join(file_name);
            ctx.runtime
                .copy(&source, &dest)
                .with_context(|| format!("Failed to install {script:?}"))?;
            ctx.runtime.set_permissions(&dest, 0o755)?;
        }

        // Sibling builds for other engine majors install same-named
        // executables and man pages; rename before the link step.
        let suffix = engine.major().to_string();
        disambiguate::disambiguate_dir(ctx.runtime, &ctx.keg_bin(), &suffix)?;
        disambiguate::disambiguate_dir(ctx.runtime, &ctx.keg_man1(), &suffix)?;
        Ok(())
    }

    fn check(&self, ctx: &CheckContext<'_>) -> Result<()> {
        let engine = engine();
        let engine_qualified = engine.to_string();
        let metadata = self.metadata();

        let mut components = metadata.version.split('.');
        let series = match (components.next(), components.next()) {
            (Some(major), Some(minor)) => format!("{major}.{minor}"),
            _ => bail!("Malformed version {:?}", metadata.version),
        };

        // The SQL scripts live in the shared qualified tree, at the
        // unsuffixed path both packages agreed on.
        let sql = ctx
            .prefix
            .join("share")
            .join(&engine_qualified)
            .join(format!("contrib/postgis-{series}"))
            .join("postgis.sql");
        let content = ctx.runtime.read_to_string(&sql)?;
        assert_matches(
            "postgis.sql version guard",
            &format!(
                r"'PostGIS built for PostgreSQL % cannot be loaded in PostgreSQL %',\s+{}\.\d,",
                engine.major()
            ),
            &content,
        )?;

        for (file, blob) in [
            ("brew.shp", SHAPEFILE_SHP),
            ("brew.dbf", SHAPEFILE_DBF),
            ("brew.shx", SHAPEFILE_SHX),
        ] {
            ctx.runtime
                .write(&ctx.work_dir.join(file), &decode_fixture(blob)?)?;
        }

        // The executable carries the engine-major suffix.
        let loader = ctx
            .keg
            .join("bin")
            .join(format!("shp2pgsql-{}", engine.major()));
        let result = output_line(
            ctx.runner,
            &Invocation::new(loader.display().to_string())
                .arg(ctx.work_dir.join("brew.shp").display().to_string()),
        )?;
        assert_contains("loader output", "Point", &result)?;
        assert_contains("loader output", "AddGeometryColumn", &result)?;

        let engine_bin = ctx.opt_bin(&engine_qualified);
        let pg_ctl = engine_bin.join("pg_ctl");
        let data = ctx.work_dir.join("test");
        let port = free_port()?;

        ClusterGuard::init(ctx.runner, &pg_ctl, &data)?;

        let conf = data.join("postgresql.conf");
        let mut settings = ctx.runtime.read_to_string(&conf)?;
        settings.push_str(&format!(
            "\nshared_preload_libraries = 'postgis-3'\nport = {port}\n"
        ));
        ctx.runtime.write(&conf, settings.as_bytes())?;

        let cluster = ClusterGuard::start(ctx.runner, &pg_ctl, &data, &ctx.work_dir.join("log"))?;
        run_checked(
            ctx.runner,
            &Invocation::new(engine_bin.join("psql").display().to_string())
                .arg("-p")
                .arg(port.to_string())
                .arg("-c")
                .arg("CREATE EXTENSION \"postgis\";")
                .arg("postgres"),
        )?;
        cluster.stop()?;
        Ok(())
    }
}

fn decode_fixture(blob: &str) -> Result<Vec<u8>> {
    let compact: String = blob.split_whitespace().collect();
    STANDARD
        .decode(compact)
        .context("Malformed shapefile fixture")
}

// A tiny five-point shapefile (geometry, attributes, index) used to exercise
// the loader end to end.
const SHAPEFILE_SHP: &str = "
    AAAnCgAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAoOgDAAALAAAAAAAAAAAAAAAA
    AAAAAADwPwAAAAAAABBAAAAAAAAAFEAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA
    AAAAAAAAAAAAAAAAAAEAAAASCwAAAAAAAAAAAPA/AAAAAAAA8D8AAAAAAAAA
    AAAAAAAAAAAAAAAAAgAAABILAAAAAAAAAAAACEAAAAAAAADwPwAAAAAAAAAA
    AAAAAAAAAAAAAAADAAAAEgsAAAAAAAAAAAAQQAAAAAAAAAhAAAAAAAAAAAAA
    AAAAAAAAAAAAAAQAAAASCwAAAAAAAAAAAABAAAAAAAAAAEAAAAAAAAAAAAAA
    AAAAAAAAAAAABQAAABILAAAAAAAAAAAAAAAAAAAAAAAUQAAAAAAAACJAAAAA
    AAAAAEA=
";

const SHAPEFILE_DBF: &str = "
    A3IJGgUAAABhAFsAAAAAAAAAAAAAAAAAAAAAAAAAAABGSVJTVF9GTEQAAEMA
    AAAAMgAAAAAAAAAAAAAAAAAAAFNFQ09ORF9GTEQAQwAAAAAoAAAAAAAAAAAA
    AAAAAAAADSBGaXJzdCAgICAgICAgICAgICAgICAgICAgICAgICAgICAgICAg
    ICAgICAgICAgICAgIFBvaW50ICAgICAgICAgICAgICAgICAgICAgICAgICAg
    ICAgICAgICAgU2Vjb25kICAgICAgICAgICAgICAgICAgICAgICAgICAgICAg
    ICAgICAgICAgICAgICBQb2ludCAgICAgICAgICAgICAgICAgICAgICAgICAg
    ICAgICAgICAgIFRoaXJkICAgICAgICAgICAgICAgICAgICAgICAgICAgICAg
    ICAgICAgICAgICAgICAgUG9pbnQgICAgICAgICAgICAgICAgICAgICAgICAg
    ICAgICAgICAgICBGb3VydGggICAgICAgICAgICAgICAgICAgICAgICAgICAg
    ICAgICAgICAgICAgICAgIFBvaW50ICAgICAgICAgICAgICAgICAgICAgICAg
    ICAgICAgICAgICAgQXBwZW5kZWQgICAgICAgICAgICAgICAgICAgICAgICAg
    ICAgICAgICAgICAgICAgICBQb2ludCAgICAgICAgICAgICAgICAgICAgICAg
    ICAgICAgICAgICAg
";

const SHAPEFILE_SHX: &str = "
    AAAnCgAAAAAAAAAAAAAAAAAAAAAAAAAAAAAARugDAAALAAAAAAAAAAAAAAAA
    AAAAAADwPwAAAAAAABBAAAAAAAAAFEAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA
    AAAAAAAAAAAAAAAAADIAAAASAAAASAAAABIAAABeAAAAEgAAAHQAAAASAAAA
    igAAABI=
";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{MockCommandRunner, RunOutput};
    use crate::runtime::MockRuntime;
    use crate::test_utils::{test_keg, test_prefix};
    use mockall::predicate::eq;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    fn keg() -> PathBuf {
        test_keg("postgis@16", "3.4.2_2")
    }

    fn recording_runner() -> (MockCommandRunner, Arc<Mutex<Vec<Invocation>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let record = calls.clone();
        let mut runner = MockCommandRunner::new();
        runner.expect_run().returning(move |inv| {
            record.lock().unwrap().push(inv.clone());
            Ok(RunOutput::ok(""))
        });
        (runner, calls)
    }

    /// A runtime that accepts the install sequence without a real keg.
    fn permissive_runtime() -> MockRuntime {
        let mut runtime = MockRuntime::new();
        runtime.expect_create_dir_all().returning(|_| Ok(()));
        runtime.expect_symlink().returning(|_, _| Ok(()));
        runtime.expect_remove_symlink().returning(|_| Ok(()));
        runtime.expect_is_symlink().returning(|_| false);
        runtime.expect_copy().returning(|_, _| Ok(0));
        runtime.expect_set_permissions().returning(|_, _| Ok(()));
        runtime.expect_is_dir().returning(|_| false);
        runtime
    }

    #[test]
    fn test_metadata_is_well_formed() {
        let metadata = PostgisAt16.metadata();
        assert_eq!(metadata.name.to_string(), "postgis@16");
        assert_eq!(metadata.version_dir(), "3.4.2_2");
    }

    #[test]
    fn test_depends_on_the_pinned_engine() {
        let deps = PostgisAt16.dependencies();
        assert!(deps.iter().any(|d| d.name == "postgresql@16"));
    }

    #[test]
    fn test_shapefile_fixtures_decode() {
        // The .shp magic number is big-endian 9994.
        let shp = decode_fixture(SHAPEFILE_SHP).unwrap();
        assert_eq!(&shp[0..4], &[0x00, 0x00, 0x27, 0x0a]);
        assert!(!decode_fixture(SHAPEFILE_DBF).unwrap().is_empty());
        assert!(!decode_fixture(SHAPEFILE_SHX).unwrap().is_empty());
    }

    #[test]
    fn test_install_aliases_the_engine_executable_for_the_build() {
        let (runner, _calls) = recording_runner();

        let mut runtime = MockRuntime::new();
        runtime.expect_create_dir_all().returning(|_| Ok(()));
        runtime
            .expect_symlink()
            .with(
                eq(PathBuf::from("/opt/kegs/opt/postgresql@16/bin/postgres")),
                eq(keg().join("bin/postgres")),
            )
            .times(1)
            .returning(|_, _| Ok(()));
        runtime
            .expect_remove_symlink()
            .with(eq(keg().join("bin/postgres")))
            .times(1)
            .returning(|_| Ok(()));
        runtime.expect_is_symlink().returning(|_| false);
        runtime.expect_copy().returning(|_, _| Ok(0));
        runtime.expect_set_permissions().returning(|_, _| Ok(()));
        runtime.expect_is_dir().returning(|_| false);

        let ctx = InstallContext {
            runtime: &runtime,
            runner: &runner,
            prefix: test_prefix(),
            keg: keg(),
            build_dir: PathBuf::from("/build/postgis-3.4.2"),
        };
        PostgisAt16.install(&ctx).unwrap();
    }

    #[test]
    fn test_install_overrides_the_hardcoded_pgxs_paths() {
        let (runner, calls) = recording_runner();
        let runtime = permissive_runtime();

        let ctx = InstallContext {
            runtime: &runtime,
            runner: &runner,
            prefix: test_prefix(),
            keg: keg(),
            build_dir: PathBuf::from("/build/postgis-3.4.2"),
        };
        PostgisAt16.install(&ctx).unwrap();

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 3);

        let configure = &calls[0];
        assert_eq!(configure.program, "./configure");
        assert!(configure.args.contains(
            &"--with-pgconfig=/opt/kegs/opt/postgresql@16/bin/pg_config".to_string()
        ));
        assert!(configure.args.contains(&"--disable-nls".to_string()));

        // Deparallelized builds run make single-job.
        let make = &calls[1];
        assert_eq!(make.program, "make");
        assert!(make.args.contains(&"-j1".to_string()));

        let install = &calls[2];
        assert!(install.args.contains(
            &"pkglibdir=/opt/kegs/cellar/postgis@16/3.4.2_2/lib/postgresql@16".to_string()
        ));
        // The SQL tree keeps the engine's qualified name inside the keg.
        assert!(install.args.contains(
            &"datadir=/opt/kegs/cellar/postgis@16/3.4.2_2/share/postgresql@16".to_string()
        ));
        assert!(install.args.contains(
            &"PG_SHAREDIR=/opt/kegs/cellar/postgis@16/3.4.2_2/share/postgresql@16".to_string()
        ));
    }

    #[test]
    fn test_install_suffixes_binaries_and_man_pages() {
        let (runner, _calls) = recording_runner();

        let mut runtime = MockRuntime::new();
        runtime.expect_create_dir_all().returning(|_| Ok(()));
        runtime.expect_symlink().returning(|_, _| Ok(()));
        runtime.expect_remove_symlink().returning(|_| Ok(()));
        runtime.expect_is_symlink().returning(|_| false);
        runtime.expect_copy().returning(|_, _| Ok(0));
        runtime.expect_set_permissions().returning(|_, _| Ok(()));
        // Both the bin and man1 directories exist and hold one artifact.
        runtime.expect_is_dir().returning(|_| true);
        runtime
            .expect_read_dir()
            .returning(|dir| Ok(vec![dir.join("shp2pgsql")]));
        let renames = Arc::new(Mutex::new(Vec::new()));
        let record = renames.clone();
        runtime.expect_rename().returning(move |from, to| {
            record
                .lock()
                .unwrap()
                .push((from.to_path_buf(), to.to_path_buf()));
            Ok(())
        });

        let ctx = InstallContext {
            runtime: &runtime,
            runner: &runner,
            prefix: test_prefix(),
            keg: keg(),
            build_dir: PathBuf::from("/build/postgis-3.4.2"),
        };
        PostgisAt16.install(&ctx).unwrap();

        let renames = renames.lock().unwrap();
        assert!(
            renames
                .iter()
                .any(|(from, to)| from.ends_with("bin/shp2pgsql")
                    && to.ends_with("bin/shp2pgsql-16"))
        );
    }

    #[test]
    fn test_check_runs_the_suffixed_loader_and_stops_the_cluster() {
        let sql_guard = "RAISE EXCEPTION '%: %', 'PostGIS built for PostgreSQL % \
             cannot be loaded in PostgreSQL %',\n        16.3,"
            .to_string();

        let mut runtime = MockRuntime::new();
        runtime
            .expect_read_to_string()
            .withf(|p: &Path| p.ends_with("postgis.sql"))
            .returning(move |_| Ok(sql_guard.clone()));
        runtime
            .expect_read_to_string()
            .withf(|p: &Path| p.ends_with("postgresql.conf"))
            .returning(|_| Ok("max_connections = 100\n".to_string()));
        let conf_writes = Arc::new(Mutex::new(Vec::new()));
        let record = conf_writes.clone();
        runtime.expect_write().returning(move |path, contents| {
            if path.ends_with("postgresql.conf") {
                record
                    .lock()
                    .unwrap()
                    .push(String::from_utf8_lossy(contents).into_owned());
            }
            Ok(())
        });

        let mut runner = MockCommandRunner::new();
        // Declared first so it is matched (and counted) before the catch-all.
        runner
            .expect_run()
            .withf(|inv| inv.args.first().is_some_and(|a| a == "stop"))
            .times(1)
            .returning(|_| Ok(RunOutput::ok("server stopped")));
        runner.expect_run().returning(|inv| {
            if inv.program.ends_with("shp2pgsql-16") {
                Ok(RunOutput::ok(
                    "SELECT AddGeometryColumn('','brew','geom','0','POINT',2);\nPoint\n",
                ))
            } else {
                Ok(RunOutput::ok(""))
            }
        });

        let ctx = CheckContext {
            runtime: &runtime,
            runner: &runner,
            prefix: test_prefix(),
            keg: keg(),
            work_dir: PathBuf::from("/tmp/check"),
        };
        PostgisAt16.check(&ctx).unwrap();

        let conf_writes = conf_writes.lock().unwrap();
        assert_eq!(conf_writes.len(), 1);
        // Existing settings are preserved; ours are appended.
        assert!(conf_writes[0].starts_with("max_connections = 100\n"));
        assert!(conf_writes[0].contains("shared_preload_libraries = 'postgis-3'"));
        assert!(conf_writes[0].contains("port = "));
    }

    #[test]
    fn test_check_fails_when_the_sql_guard_targets_another_major() {
        let mut runtime = MockRuntime::new();
        runtime
            .expect_read_to_string()
            .withf(|p: &Path| p.ends_with("postgis.sql"))
            .returning(|_| {
                Ok("'PostGIS built for PostgreSQL % cannot be loaded in PostgreSQL %',\n    15.6,"
                    .to_string())
            });

        let runner = MockCommandRunner::new();
        let ctx = CheckContext {
            runtime: &runtime,
            runner: &runner,
            prefix: test_prefix(),
            keg: keg(),
            work_dir: PathBuf::from("/tmp/check"),
        };
        let err = PostgisAt16.check(&ctx).unwrap_err();
        assert!(err.to_string().contains("version guard"));
    }
}
