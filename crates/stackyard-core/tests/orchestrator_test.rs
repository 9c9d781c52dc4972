#![allow(clippy::unwrap_used)]
// Lifecycle tests against the in-memory runtime and a temp directory.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use stackyard_core::archive::{read_export_metadata, unpack_export};
use stackyard_core::{
    BroadcastSink, ContentSource, CoreError, DeleteOptions, EngineConfig, Layout, MemoryRegistry,
    NewSite, Orchestrator, Role, SiteEvent, SiteState, SiteUpdate,
};
use stackyard_runtime::{
    ContainerSpec, ExecOutput, MemoryRuntime, Mount, RuntimeCall, RuntimeGateway,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

struct Harness {
    dir: TempDir,
    rt: Arc<MemoryRuntime>,
    orch: Orchestrator,
    layout: Layout,
    cancel: CancellationToken,
}

fn config(dir: &Path) -> EngineConfig {
    EngineConfig::new(dir.join("base"), dir.join("sites")).with_prefix("yard")
}

async fn harness_with(configure: impl FnOnce(EngineConfig) -> EngineConfig) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let config = configure(config(dir.path()));
    let layout = Layout::new(&config);
    let rt = Arc::new(MemoryRuntime::new());
    let orch = Orchestrator::new(config, rt.clone(), Arc::new(MemoryRegistry::new()));
    let cancel = CancellationToken::new();
    orch.initialize(&cancel).await.unwrap();
    Harness {
        dir,
        rt,
        orch,
        layout,
        cancel,
    }
}

async fn harness() -> Harness {
    harness_with(|c| c).await
}

fn site_containers(names: &[String], slug: &str) -> Vec<String> {
    let prefix = format!("yard-{slug}-");
    names
        .iter()
        .filter(|n| n.starts_with(&prefix))
        .cloned()
        .collect()
}

// ── Create ──────────────────────────────────────────────────────────

#[tokio::test]
async fn my_blog_gets_four_containers_and_one_private_network() {
    let h = harness().await;
    let site = h.orch.create_site(NewSite::named("My Blog")).await.unwrap();
    assert_eq!(site.slug, "my-blog");
    assert_eq!(site.domain, "my-blog.localhost");
    assert!(!site.started);
    assert!(site.files_dir.is_dir());

    let site = h.orch.start_site(site.id, &h.cancel).await.unwrap();
    assert!(site.started);

    let containers = site_containers(&h.rt.container_names().await, "my-blog");
    assert_eq!(
        containers,
        vec![
            "yard-my-blog-app",
            "yard-my-blog-cache",
            "yard-my-blog-database",
            "yard-my-blog-web"
        ]
    );
    let networks = h.rt.network_names().await;
    assert_eq!(networks, vec!["yard-global", "yard-my-blog"]);

    let web_nets = h.rt.container_networks("yard-my-blog-web").await;
    assert_eq!(web_nets.len(), 2);
    let db_nets = h.rt.container_networks("yard-my-blog-database").await;
    assert_eq!(db_nets.keys().collect::<Vec<_>>(), vec!["yard-my-blog"]);

    let map = std::fs::read_to_string(h.layout.map_conf()).unwrap();
    assert!(map.contains("my-blog.localhost yard-my-blog-web:80;"));
    assert_eq!(h.orch.site_state(site.id).await.unwrap(), SiteState::Started);
}

#[tokio::test]
async fn start_without_initialize_lays_out_the_base_dir_first() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let layout = Layout::new(&config);
    let rt = Arc::new(MemoryRuntime::new());
    let orch = Orchestrator::new(config, rt.clone(), Arc::new(MemoryRegistry::new()));
    let cancel = CancellationToken::new();

    let site = orch.create_site(NewSite::named("Blog")).await.unwrap();
    let site = orch.start_site(site.id, &cancel).await.unwrap();
    assert!(site.started);

    assert!(layout.proxy_main_conf().is_file());
    assert!(layout.php_ini().is_file());
    assert!(layout.db_cnf().is_file());
    assert!(layout.site_web_conf("blog").is_file());
    assert!(layout.site_proxy_conf("blog").is_file());
    let map = std::fs::read_to_string(layout.map_conf()).unwrap();
    assert!(map.contains("blog.localhost yard-blog-web:80;"));
    assert!(rt.container_names().await.contains(&"yard-global-proxy".to_owned()));
}

#[tokio::test]
async fn slug_collisions_and_reserved_names_are_rejected() {
    let h = harness().await;
    h.orch.create_site(NewSite::named("My Blog")).await.unwrap();

    let dup = h.orch.create_site(NewSite::named("my   blog!")).await;
    assert!(matches!(dup, Err(CoreError::SlugCollision { ref slug }) if slug == "my-blog"));

    let reserved = h.orch.create_site(NewSite::named("Global")).await;
    assert!(matches!(reserved, Err(CoreError::Validation { .. })));

    let empty = h.orch.create_site(NewSite::named("!!!")).await;
    assert!(matches!(empty, Err(CoreError::Validation { .. })));

    assert_eq!(h.orch.list_sites().await.unwrap().len(), 1);
}

// ── Start / stop ────────────────────────────────────────────────────

#[tokio::test]
async fn starting_twice_creates_nothing_new() {
    let h = harness().await;
    let site = h.orch.create_site(NewSite::named("Blog")).await.unwrap();
    h.orch.start_site(site.id, &h.cancel).await.unwrap();

    h.rt.clear_journal().await;
    h.orch.start_site(site.id, &h.cancel).await.unwrap();
    assert_eq!(h.rt.container_creations().await, 0);
    assert!(h.rt.journal().await.is_empty());
}

#[tokio::test]
async fn content_and_database_volume_survive_stop_and_start() {
    let h = harness().await;
    let site = h.orch.create_site(NewSite::named("Blog")).await.unwrap();
    std::fs::write(site.files_dir.join("marker.txt"), "still here").unwrap();

    h.orch.start_site(site.id, &h.cancel).await.unwrap();
    let stopped = h.orch.stop_site(site.id).await.unwrap();
    assert!(!stopped.started);
    assert!(site_containers(&h.rt.container_names().await, "blog").is_empty());
    assert_eq!(h.rt.volume_names().await, vec!["yard-blog-dbdata"]);
    let map = std::fs::read_to_string(h.layout.map_conf()).unwrap();
    assert!(!map.contains("blog.localhost"));

    h.orch.start_site(site.id, &h.cancel).await.unwrap();
    assert_eq!(
        std::fs::read_to_string(site.files_dir.join("marker.txt")).unwrap(),
        "still here"
    );
    assert_eq!(h.rt.volume_names().await, vec!["yard-blog-dbdata"]);
}

#[tokio::test]
async fn failed_provisioning_can_be_retried() {
    let h = harness().await;
    let site = h.orch.create_site(NewSite::named("Blog")).await.unwrap();
    h.rt.fail_next_create("yard-blog-cache").await;

    let err = h.orch.start_site(site.id, &h.cancel).await.unwrap_err();
    assert!(matches!(err, CoreError::Runtime { status: 500, .. }));
    assert!(!h.orch.get_site(site.id).await.unwrap().started);
    assert_eq!(h.orch.site_state(site.id).await.unwrap(), SiteState::Stopped);

    h.rt.clear_journal().await;
    let site = h.orch.start_site(site.id, &h.cancel).await.unwrap();
    assert!(site.started);
    assert_eq!(h.rt.container_creations().await, 1);
}

#[tokio::test]
async fn unreachable_runtime_fails_start_but_not_listing() {
    let h = harness().await;
    let site = h.orch.create_site(NewSite::named("Blog")).await.unwrap();
    h.rt.set_unavailable(true);

    let err = h.orch.start_site(site.id, &h.cancel).await.unwrap_err();
    assert!(matches!(err, CoreError::RuntimeUnavailable { .. }));
    assert_eq!(h.orch.list_sites().await.unwrap().len(), 1);
    assert!(!h.orch.get_site(site.id).await.unwrap().started);
}

#[tokio::test]
async fn sites_start_independently_in_parallel() {
    let h = harness().await;
    let a = h.orch.create_site(NewSite::named("Alpha")).await.unwrap();
    let b = h.orch.create_site(NewSite::named("Beta")).await.unwrap();

    let (ra, rb) = tokio::join!(
        h.orch.start_site(a.id, &h.cancel),
        h.orch.start_site(b.id, &h.cancel)
    );
    ra.unwrap();
    rb.unwrap();

    let map = std::fs::read_to_string(h.layout.map_conf()).unwrap();
    assert!(map.contains("alpha.localhost yard-alpha-web:80;"));
    assert!(map.contains("beta.localhost yard-beta-web:80;"));
}

#[tokio::test]
async fn cancelled_start_leaves_the_site_stopped_and_retryable() {
    let h = harness().await;
    let site = h.orch.create_site(NewSite::named("Blog")).await.unwrap();
    let cancel = CancellationToken::new();
    h.rt.cancel_after_create("yard-blog-app", cancel.clone())
        .await;

    let err = h.orch.start_site(site.id, &cancel).await.unwrap_err();
    assert!(matches!(err, CoreError::Cancelled));
    assert!(!h.orch.get_site(site.id).await.unwrap().started);
    assert_eq!(h.orch.site_state(site.id).await.unwrap(), SiteState::Stopped);
    assert_eq!(
        site_containers(&h.rt.container_names().await, "blog"),
        vec!["yard-blog-app", "yard-blog-web"]
    );
    let map = std::fs::read_to_string(h.layout.map_conf()).unwrap();
    assert!(!map.contains("blog.localhost"));

    h.rt.clear_journal().await;
    let site = h.orch.start_site(site.id, &h.cancel).await.unwrap();
    assert!(site.started);
    assert_eq!(h.rt.container_creations().await, 2);
}

#[tokio::test]
async fn cancelled_download_seeds_nothing_and_creates_no_stack() {
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30)))
        .mount(&server)
        .await;
    let source = ContentSource::parse(&format!("{}/latest.tar.gz", server.uri()));
    let h = harness_with(|c| c.with_content_source(source)).await;
    let site = h.orch.create_site(NewSite::named("Blog")).await.unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let err = h.orch.start_site(site.id, &cancel).await.unwrap_err();
    assert!(matches!(err, CoreError::Cancelled));
    assert!(!h.orch.get_site(site.id).await.unwrap().started);
    assert_eq!(std::fs::read_dir(&site.files_dir).unwrap().count(), 0);
    assert!(site_containers(&h.rt.container_names().await, "blog").is_empty());
}

#[tokio::test]
async fn start_and_stop_of_one_site_never_interleave() {
    let h = harness().await;
    let site = h.orch.create_site(NewSite::named("Blog")).await.unwrap();
    h.rt.clear_journal().await;

    let (started, stopped) = tokio::join!(
        h.orch.start_site(site.id, &h.cancel),
        h.orch.stop_site(site.id)
    );
    started.unwrap();
    stopped.unwrap();

    // true: bringing the stack up, false: tearing it down.
    let journal = h.rt.journal().await;
    let phases: Vec<bool> = journal
        .iter()
        .filter_map(|call| match call {
            RuntimeCall::CreateContainer(n) | RuntimeCall::StartContainer(n) => {
                n.starts_with("yard-blog-").then_some(true)
            }
            RuntimeCall::StopContainer(n) | RuntimeCall::RemoveContainer(n) => {
                n.starts_with("yard-blog-").then_some(false)
            }
            _ => None,
        })
        .collect();
    assert!(phases.contains(&true) && phases.contains(&false));
    let switches = phases.windows(2).filter(|w| w[0] != w[1]).count();
    assert_eq!(switches, 1, "interleaved: {journal:?}");

    let site = h.orch.get_site(site.id).await.unwrap();
    let running = !site_containers(&h.rt.container_names().await, "blog").is_empty();
    assert_eq!(site.started, running);
}

// ── Routing ─────────────────────────────────────────────────────────

#[tokio::test]
async fn failed_validation_never_reloads_and_keeps_other_routes() {
    let h = harness().await;
    let alpha = h.orch.create_site(NewSite::named("Alpha")).await.unwrap();
    h.orch.start_site(alpha.id, &h.cancel).await.unwrap();

    let alpha_conf = std::fs::read(h.layout.site_proxy_conf("alpha")).unwrap();
    let map_before = std::fs::read(h.layout.map_conf()).unwrap();

    h.rt.reply_to_exec("nginx -t", ExecOutput::failed(1, "[emerg] unexpected"))
        .await;
    h.rt.clear_journal().await;

    let beta = h.orch.create_site(NewSite::named("Beta")).await.unwrap();
    let err = h.orch.start_site(beta.id, &h.cancel).await.unwrap_err();
    assert!(matches!(err, CoreError::ConfigValidationFailed { .. }));

    let execs = h.rt.exec_history().await;
    assert!(execs.iter().any(|c| c.starts_with("nginx -t")));
    assert!(!execs.iter().any(|c| c.contains("reload")));
    assert_eq!(
        std::fs::read(h.layout.site_proxy_conf("alpha")).unwrap(),
        alpha_conf
    );
    assert_eq!(std::fs::read(h.layout.map_conf()).unwrap(), map_before);

    // The rejected start is rolled back and stays out of later passes.
    assert!(!h.layout.site_proxy_conf("beta").exists());
    assert!(!h.orch.get_site(beta.id).await.unwrap().started);
    assert_eq!(h.orch.site_state(beta.id).await.unwrap(), SiteState::Stopped);
    assert!(site_containers(&h.rt.container_names().await, "beta").is_empty());

    h.rt.reply_to_exec("nginx -t", ExecOutput::ok("syntax is ok"))
        .await;
    let gamma = h.orch.create_site(NewSite::named("Gamma")).await.unwrap();
    h.orch.start_site(gamma.id, &h.cancel).await.unwrap();
    let map = std::fs::read_to_string(h.layout.map_conf()).unwrap();
    assert!(map.contains("alpha.localhost"));
    assert!(map.contains("gamma.localhost"));
    assert!(!map.contains("beta.localhost"));
    assert!(!h.layout.site_proxy_conf("beta").exists());
}

#[tokio::test]
async fn reconcile_only_flips_flags() {
    let h = harness().await;
    let site = h.orch.create_site(NewSite::named("Blog")).await.unwrap();
    h.orch.start_site(site.id, &h.cancel).await.unwrap();

    // Unclean host restart: containers and networks gone, flags still set.
    h.rt.wipe_containers().await;
    h.rt.clear_journal().await;

    assert_eq!(h.orch.reconcile().await.unwrap(), 1);
    assert!(h.rt.journal().await.is_empty());
    assert!(!h.orch.get_site(site.id).await.unwrap().started);

    let site = h.orch.start_site(site.id, &h.cancel).await.unwrap();
    assert!(site.started);
    assert!(h.rt.container_names().await.contains(&"yard-global-proxy".to_owned()));
}

// ── Edit / delete ───────────────────────────────────────────────────

#[tokio::test]
async fn stack_settings_only_change_while_stopped() {
    let h = harness().await;
    let site = h.orch.create_site(NewSite::named("Blog")).await.unwrap();
    h.orch.start_site(site.id, &h.cancel).await.unwrap();

    let bump = SiteUpdate {
        php_version: Some("8.4".into()),
        ..SiteUpdate::default()
    };
    let err = h.orch.update_site(site.id, bump.clone()).await.unwrap_err();
    assert!(matches!(err, CoreError::InvalidState { .. }));

    let rename = SiteUpdate {
        name: Some("Renamed Blog".into()),
        ..SiteUpdate::default()
    };
    let renamed = h.orch.update_site(site.id, rename).await.unwrap();
    assert_eq!(renamed.name, "Renamed Blog");
    assert_eq!(renamed.slug, "blog");
    assert_eq!(renamed.domain, "blog.localhost");

    h.orch.stop_site(site.id).await.unwrap();
    let bumped = h.orch.update_site(site.id, bump).await.unwrap();
    assert_eq!(bumped.php_version, "8.4");
}

#[tokio::test]
async fn delete_keeps_data_unless_asked() {
    let h = harness().await;
    let keep = h.orch.create_site(NewSite::named("Keep")).await.unwrap();
    h.orch.start_site(keep.id, &h.cancel).await.unwrap();
    h.orch
        .delete_site(keep.id, DeleteOptions::default())
        .await
        .unwrap();

    assert!(matches!(
        h.orch.get_site(keep.id).await,
        Err(CoreError::SiteNotFound { .. })
    ));
    assert!(site_containers(&h.rt.container_names().await, "keep").is_empty());
    assert!(!h.rt.network_names().await.contains(&"yard-keep".to_owned()));
    assert_eq!(h.rt.volume_names().await, vec!["yard-keep-dbdata"]);
    assert!(keep.files_dir.is_dir());
    assert!(!h.layout.site_proxy_conf("keep").exists());

    let gone = h.orch.create_site(NewSite::named("Gone")).await.unwrap();
    h.orch.start_site(gone.id, &h.cancel).await.unwrap();
    h.orch
        .delete_site(gone.id, DeleteOptions { destroy_data: true })
        .await
        .unwrap();
    assert_eq!(h.rt.volume_names().await, vec!["yard-keep-dbdata"]);
    assert!(!gone.files_dir.exists());
}

#[tokio::test]
async fn destroying_data_fails_while_the_volume_is_mounted_elsewhere() {
    let h = harness().await;
    let site = h.orch.create_site(NewSite::named("Gone")).await.unwrap();
    h.orch.start_site(site.id, &h.cancel).await.unwrap();

    h.rt.seed_image("busybox:1").await;
    h.rt.create_container(&ContainerSpec {
        name: "backup-job".into(),
        image: "busybox:1".into(),
        mounts: vec![Mount::volume("yard-gone-dbdata", "/backup")],
        ..ContainerSpec::default()
    })
    .await
    .unwrap();

    let err = h
        .orch
        .delete_site(site.id, DeleteOptions { destroy_data: true })
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::InUse { ref name, .. } if name == "yard-gone-dbdata"));
    assert_eq!(h.rt.volume_names().await, vec!["yard-gone-dbdata"]);
    assert!(h.orch.get_site(site.id).await.is_ok());
    assert!(site.files_dir.is_dir());

    h.rt.remove_container("backup-job", true).await.unwrap();
    h.orch
        .delete_site(site.id, DeleteOptions { destroy_data: true })
        .await
        .unwrap();
    assert!(h.rt.volume_names().await.is_empty());
}

// ── Exec / logs ─────────────────────────────────────────────────────

#[tokio::test]
async fn app_commands_need_a_started_site() {
    let h = harness().await;
    let site = h.orch.create_site(NewSite::named("Blog")).await.unwrap();
    let args = vec!["wp".to_owned(), "plugin".into(), "list".into()];

    let err = h
        .orch
        .run_app_command(site.id, &args, &h.cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::InvalidState { .. }));

    h.orch.start_site(site.id, &h.cancel).await.unwrap();
    h.rt.reply_to_exec("wp plugin", ExecOutput::ok("akismet\n"))
        .await;
    let out = h
        .orch
        .run_app_command(site.id, &args, &h.cancel)
        .await
        .unwrap();
    assert_eq!(out.output, "akismet\n");

    h.rt.reply_to_exec("wp plugin", ExecOutput::failed(1, "Error: boom"))
        .await;
    let err = h
        .orch
        .run_app_command(site.id, &args, &h.cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::ExecFailed { exit_code: 1, .. }));
}

#[tokio::test]
async fn logs_come_from_the_role_container() {
    let h = harness().await;
    let site = h.orch.create_site(NewSite::named("Blog")).await.unwrap();
    h.orch.start_site(site.id, &h.cancel).await.unwrap();
    h.rt.push_logs("yard-blog-app", &["one", "two", "three"])
        .await;

    let logs = h.orch.site_logs(site.id, Role::App, 2).await.unwrap();
    assert_eq!(logs, "two\nthree\n");
}

// ── Archives ────────────────────────────────────────────────────────

#[tokio::test]
async fn export_round_trips_metadata_dump_and_files() {
    let h = harness().await;
    let site = h.orch.create_site(NewSite::named("Blog")).await.unwrap();
    std::fs::create_dir_all(site.files_dir.join("wp-content/uploads")).unwrap();
    std::fs::create_dir_all(site.files_dir.join("empty")).unwrap();
    std::fs::write(site.files_dir.join("index.php"), "<?php echo 1;").unwrap();
    std::fs::write(site.files_dir.join("wp-content/uploads/a.txt"), "upload").unwrap();

    let err = h
        .orch
        .export_site(site.id, &h.dir.path().join("early.tar.gz"), &h.cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::InvalidState { .. }));

    h.orch.start_site(site.id, &h.cancel).await.unwrap();
    h.rt.reply_to_exec(
        "mysqldump",
        ExecOutput::new(
            0,
            "-- dump\nCREATE TABLE t;\n",
            "mysqldump: [Warning] Using a password on the command line interface can be insecure.\n",
        ),
    )
    .await;

    let dest = h.dir.path().join("exports/blog.tar.gz");
    let report = h
        .orch
        .export_site(site.id, &dest, &h.cancel)
        .await
        .unwrap();
    assert_eq!(report.files, 2);
    assert_eq!(report.dirs, 4);
    assert!(report.bytes > 0);

    let meta = read_export_metadata(&dest).await.unwrap();
    assert_eq!(meta.site.slug, "blog");
    assert_eq!(meta.site.id, site.id);

    let out = h.dir.path().join("unpacked");
    let unpacked = unpack_export(&dest, &out).await.unwrap();
    assert_eq!(unpacked, meta);
    assert_eq!(
        std::fs::read_to_string(out.join("database.sql")).unwrap(),
        "-- dump\nCREATE TABLE t;\n"
    );
    assert_eq!(
        std::fs::read_to_string(out.join("files/wp-content/uploads/a.txt")).unwrap(),
        "upload"
    );
    assert!(out.join("files/empty").is_dir());

    let dumps: Vec<_> = h
        .rt
        .exec_history()
        .await
        .into_iter()
        .filter(|c| c.starts_with("mysqldump"))
        .collect();
    assert_eq!(dumps.len(), 1);
    assert!(!dumps[0].contains(&site.db_password));
    assert!(!dumps[0].contains(" -p"));
    let pwd = format!("MYSQL_PWD={}", site.db_password);
    let journal = h.rt.journal().await;
    assert!(journal.iter().any(|call| matches!(
        call,
        RuntimeCall::Exec { cmd, env, .. } if cmd[0] == "mysqldump" && env.contains(&pwd)
    )));
}

#[tokio::test]
async fn start_seeds_empty_content_from_bundle() {
    let staging = tempfile::tempdir().unwrap();
    let bundle = staging.path().join("latest.tar.gz");
    write_bundle(&bundle);

    let source = ContentSource::File(bundle);
    let h = harness_with(|c| c.with_content_source(source)).await;
    let site = h.orch.create_site(NewSite::named("Blog")).await.unwrap();
    h.orch.start_site(site.id, &h.cancel).await.unwrap();

    assert_eq!(
        std::fs::read_to_string(site.files_dir.join("index.php")).unwrap(),
        "<?php // seeded"
    );

    // Populated now: a restart leaves edits alone.
    std::fs::write(site.files_dir.join("index.php"), "edited").unwrap();
    h.orch.stop_site(site.id).await.unwrap();
    h.orch.start_site(site.id, &h.cancel).await.unwrap();
    assert_eq!(
        std::fs::read_to_string(site.files_dir.join("index.php")).unwrap(),
        "edited"
    );
}

fn write_bundle(path: &Path) {
    use flate2::Compression;
    use flate2::write::GzEncoder;

    let file = std::fs::File::create(path).unwrap();
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    let body = b"<?php // seeded";
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Regular);
    header.set_size(body.len() as u64);
    header.set_mode(0o644);
    builder
        .append_data(&mut header, "wordpress/index.php", &body[..])
        .unwrap();
    builder.into_inner().unwrap().finish().unwrap();
}

// ── Events ──────────────────────────────────────────────────────────

#[tokio::test]
async fn transitions_are_broadcast() {
    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(BroadcastSink::new());
    let mut rx = sink.subscribe();
    let orch = Orchestrator::with_events(
        config(dir.path()),
        Arc::new(MemoryRuntime::new()),
        Arc::new(MemoryRegistry::new()),
        sink.clone(),
    );
    let cancel = CancellationToken::new();
    orch.initialize(&cancel).await.unwrap();

    let site = orch.create_site(NewSite::named("Blog")).await.unwrap();
    orch.start_site(site.id, &cancel).await.unwrap();

    let mut states = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let SiteEvent::SiteChanged { state, .. } = &*event {
            states.push(*state);
        }
    }
    assert_eq!(
        states,
        vec![SiteState::Stopped, SiteState::Starting, SiteState::Started]
    );
    assert_eq!(sink.sites().borrow().len(), 1);
    assert!(sink.sites().borrow()[0].started);
}
