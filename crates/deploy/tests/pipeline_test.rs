//! Pipeline tests against in-memory image and cluster backends.
//!
//! No Docker daemon or cluster is needed. The fakes record every call so the
//! tests can check stage ordering and what a failure leaves behind.
//! Run with: cargo test --test pipeline_test

use std::{
    path::PathBuf,
    sync::{Arc, Mutex},
};

use anyhow::Result;
use shipwright_deploy::{
    AppliedResource, ApplyAction, ApplyError, ApplyOutcome, BuildRequest, ClusterApplier,
    DeploymentRecord, ImageBackend, ImageRef, ImageTag, LocalImage, Pipeline, PipelineConfig,
    PipelineError, RunOptions, Stage, TemplateError,
};
use tempdir::TempDir;

const MANIFEST: &str = "\
apiVersion: apps/v1
kind: Deployment
metadata:
  name: application-api
spec:
  template:
    spec:
      containers:
        - name: application-api
          image: ${REGISTRY}/application-api:${TAG}
          env:
            - name: LOG_LEVEL
              value: ${LOG_LEVEL:-info}
";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    Build(String),
    Existing(String),
    Tag(String, String),
    Push(String),
    Apply(String),
}

type Calls = Arc<Mutex<Vec<Call>>>;

#[derive(Clone, Copy, Default)]
enum FailAt {
    #[default]
    Nowhere,
    Build,
    Push,
    Apply(Option<i32>),
}

#[derive(Clone)]
struct FakeBackend {
    calls: Calls,
    requests: Arc<Mutex<Vec<BuildRequest>>>,
    fail: FailAt,
}

impl ImageBackend for FakeBackend {
    async fn build(&self, request: &BuildRequest) -> Result<LocalImage> {
        self.calls
            .lock()
            .unwrap()
            .push(Call::Build(request.local.to_string()));
        self.requests.lock().unwrap().push(request.clone());
        if let FailAt::Build = self.fail {
            anyhow::bail!("error[E0425]: cannot find value `x` in this scope");
        }
        Ok(LocalImage {
            reference: request.local.clone(),
            id: Some("sha256:0123".to_string()),
        })
    }

    async fn existing(&self, local: &ImageRef) -> Result<LocalImage> {
        self.calls
            .lock()
            .unwrap()
            .push(Call::Existing(local.to_string()));
        Ok(LocalImage {
            reference: local.clone(),
            id: None,
        })
    }

    async fn tag(&self, image: &LocalImage, target: &ImageRef) -> Result<()> {
        self.calls.lock().unwrap().push(Call::Tag(
            image.reference.to_string(),
            target.to_string(),
        ));
        Ok(())
    }

    async fn push(&self, target: &ImageRef) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(Call::Push(target.to_string()));
        if let FailAt::Push = self.fail {
            anyhow::bail!("unauthorized: authentication required");
        }
        Ok(())
    }
}

#[derive(Clone)]
struct FakeCluster {
    calls: Calls,
    fail: FailAt,
}

impl ClusterApplier for FakeCluster {
    async fn apply(&self, manifest: &str) -> Result<ApplyOutcome> {
        self.calls
            .lock()
            .unwrap()
            .push(Call::Apply(manifest.to_string()));
        if let FailAt::Apply(status) = self.fail {
            return Err(ApplyError {
                status,
                stderr: "error: unable to recognize \"STDIN\"".to_string(),
            }
            .into());
        }
        Ok(ApplyOutcome {
            resources: vec![AppliedResource {
                resource: "deployment.apps/application-api".to_string(),
                action: ApplyAction::Configured,
            }],
        })
    }
}

/// Test setup: a temporary source tree with a manifest, and recording fakes.
struct TestContext {
    dir: TempDir,
    calls: Calls,
    requests: Arc<Mutex<Vec<BuildRequest>>>,
}

impl TestContext {
    fn new(manifest: &str) -> Self {
        let dir = TempDir::new("shipwright-pipeline").unwrap();
        std::fs::write(dir.path().join("k8s.yaml"), manifest).unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), "[package]\n").unwrap();

        Self {
            dir,
            calls: Arc::default(),
            requests: Arc::default(),
        }
    }

    fn config(&self) -> PipelineConfig {
        let mut config = PipelineConfig {
            registry: "ghcr.io/acme".to_string(),
            source_dir: self.dir.path().to_path_buf(),
            ..Default::default()
        };
        config.cluster.manifest = self.dir.path().join("k8s.yaml");
        config.report.workspace = Some("fluffy-space-guide".to_string());
        config
    }

    fn pipeline(&self, fail: FailAt) -> Pipeline<FakeBackend, FakeCluster> {
        self.pipeline_with(self.config(), fail)
    }

    fn pipeline_with(
        &self,
        config: PipelineConfig,
        fail: FailAt,
    ) -> Pipeline<FakeBackend, FakeCluster> {
        let (backend, cluster) = self.fakes(fail);
        Pipeline::new(config, backend, cluster)
            .unwrap()
            .with_env(Vec::new())
    }

    fn fakes(&self, fail: FailAt) -> (FakeBackend, FakeCluster) {
        let backend = FakeBackend {
            calls: self.calls.clone(),
            requests: self.requests.clone(),
            fail,
        };
        let cluster = FakeCluster {
            calls: self.calls.clone(),
            fail,
        };
        (backend, cluster)
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn state_dir(&self) -> PathBuf {
        self.dir.path().join(".shipwright")
    }
}

fn tag(s: &str) -> ImageTag {
    s.parse().unwrap()
}

fn options(t: &str) -> RunOptions {
    RunOptions {
        tag: Some(tag(t)),
        skip_build: false,
    }
}

#[tokio::test]
async fn test_successful_run_uses_one_tag_everywhere() {
    let ctx = TestContext::new(MANIFEST);
    let pipeline = ctx.pipeline(FailAt::Nowhere);

    let report = pipeline.run_with(options("20240101T000000Z")).await.unwrap();

    assert_eq!(
        ctx.calls(),
        vec![
            Call::Build("application-api:20240101T000000Z".to_string()),
            Call::Tag(
                "application-api:20240101T000000Z".to_string(),
                "ghcr.io/acme/application-api:20240101T000000Z".to_string()
            ),
            Call::Push("ghcr.io/acme/application-api:20240101T000000Z".to_string()),
            Call::Apply(report.manifest.clone()),
        ]
    );
    assert!(
        report
            .manifest
            .contains("image: ghcr.io/acme/application-api:20240101T000000Z")
    );
    assert!(report.manifest.contains("value: info"));
    assert!(!report.manifest.contains("${"));
    assert_eq!(report.image.tag.as_deref(), Some("20240101T000000Z"));
}

#[tokio::test]
async fn test_generated_tag_matches_push_and_manifest() {
    let ctx = TestContext::new(MANIFEST);
    let report = ctx.pipeline(FailAt::Nowhere).run().await.unwrap();

    let pushed = ctx
        .calls()
        .into_iter()
        .find_map(|call| match call {
            Call::Push(image) => Some(image),
            _ => None,
        })
        .unwrap();
    assert_eq!(
        pushed,
        format!("ghcr.io/acme/application-api:{}", report.tag)
    );
    assert!(report.manifest.contains(&pushed));
    assert_eq!(report.tag.to_string().len(), "YYYYMMDDTHHMMSSZ".len());
}

#[tokio::test]
async fn test_report_lists_endpoints() {
    let ctx = TestContext::new(MANIFEST);
    let report = ctx
        .pipeline(FailAt::Nowhere)
        .run_with(options("20240101T000000Z"))
        .await
        .unwrap();

    let urls: Vec<_> = report
        .endpoints
        .iter()
        .map(|e| (e.name.as_str(), e.url.as_str()))
        .collect();
    assert_eq!(
        urls,
        vec![
            ("Dev Portal", "https://fluffy-space-guide-7007.app.github.dev/"),
            ("Application", "https://fluffy-space-guide-8080.app.github.dev/"),
        ]
    );
}

#[tokio::test]
async fn test_build_failure_stops_before_registry() {
    let ctx = TestContext::new(MANIFEST);
    let err = ctx
        .pipeline(FailAt::Build)
        .run_with(options("20240101T000000Z"))
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Build(_)));
    assert_eq!(err.stage(), Some(Stage::Build));
    assert!(err.to_string().contains("E0425"));
    assert_eq!(
        ctx.calls(),
        vec![Call::Build("application-api:20240101T000000Z".to_string())]
    );
    assert!(DeploymentRecord::load(&ctx.state_dir()).is_err());
}

#[tokio::test]
async fn test_push_failure_stops_before_apply() {
    let ctx = TestContext::new(MANIFEST);
    let err = ctx
        .pipeline(FailAt::Push)
        .run_with(options("20240101T000000Z"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Registry {
            stage: Stage::Push,
            ..
        }
    ));
    assert_eq!(err.exit_code(), 4);
    assert!(
        !ctx.calls()
            .iter()
            .any(|call| matches!(call, Call::Apply(_)))
    );
}

#[tokio::test]
async fn test_missing_variable_fails_before_build() {
    let ctx = TestContext::new("image: ${IMAGE}\nreplicas: ${REPLICAS}\nteam: $TEAM\n");
    let err = ctx
        .pipeline(FailAt::Nowhere)
        .run_with(options("20240101T000000Z"))
        .await
        .unwrap_err();

    match err {
        PipelineError::Template(TemplateError::MissingVariables(ref names)) => {
            assert_eq!(names, &vec!["REPLICAS".to_string(), "TEAM".to_string()]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(ctx.calls().is_empty());
}

#[tokio::test]
async fn test_apply_failure_keeps_kubectl_status() {
    let ctx = TestContext::new(MANIFEST);
    let err = ctx
        .pipeline(FailAt::Apply(Some(1)))
        .run_with(options("20240101T000000Z"))
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Cluster { status: Some(1), .. }));
    assert_eq!(err.exit_code(), 1);
    assert!(err.to_string().contains("unable to recognize"));
    // The image stays pushed; only the record is missing.
    assert!(
        ctx.calls()
            .iter()
            .any(|call| matches!(call, Call::Push(_)))
    );
    assert!(DeploymentRecord::load(&ctx.state_dir()).is_err());
}

#[tokio::test]
async fn test_two_runs_update_same_resource() {
    let ctx = TestContext::new(MANIFEST);
    let pipeline = ctx.pipeline(FailAt::Nowhere);

    let first = pipeline.run_with(options("20240101T000000Z")).await.unwrap();
    let second = pipeline.run_with(options("20240101T000001Z")).await.unwrap();

    assert_ne!(first.tag, second.tag);
    assert_ne!(first.manifest, second.manifest);
    for report in [&first, &second] {
        assert!(report.manifest.contains("name: application-api"));
    }

    let record = DeploymentRecord::load(&ctx.state_dir()).unwrap();
    assert_eq!(record.tag, second.tag);
}

#[tokio::test]
async fn test_record_saved_after_apply() {
    let ctx = TestContext::new(MANIFEST);
    let report = ctx
        .pipeline(FailAt::Nowhere)
        .run_with(options("20240101T000000Z"))
        .await
        .unwrap();

    assert_eq!(report.record_path, Some(ctx.state_dir().join("last-deploy.json")));

    let record = DeploymentRecord::load(&ctx.state_dir()).unwrap();
    assert_eq!(record.image, report.image);
    assert_eq!(record.resources, report.outcome.resources);
    assert_eq!(record.endpoints, report.endpoints);
    assert_eq!(
        record.manifest_sha256,
        shipwright_deploy::manifest_digest(&report.manifest)
    );
}

#[tokio::test]
async fn test_skip_build_reuses_existing_image() {
    let ctx = TestContext::new(MANIFEST);
    let report = ctx
        .pipeline(FailAt::Nowhere)
        .run_with(RunOptions {
            tag: Some(tag("20240101T000000Z")),
            skip_build: true,
        })
        .await
        .unwrap();

    let calls = ctx.calls();
    assert_eq!(
        calls[0],
        Call::Existing("application-api:20240101T000000Z".to_string())
    );
    assert!(!calls.iter().any(|call| matches!(call, Call::Build(_))));
    assert_eq!(report.tag, tag("20240101T000000Z"));
}

#[tokio::test]
async fn test_skip_build_requires_tag() {
    let ctx = TestContext::new(MANIFEST);
    let err = ctx
        .pipeline(FailAt::Nowhere)
        .run_with(RunOptions {
            tag: None,
            skip_build: true,
        })
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Config(_)));
    assert_eq!(err.exit_code(), 2);
    assert!(ctx.calls().is_empty());
}

#[tokio::test]
async fn test_pipeline_variables_override_environment() {
    let ctx = TestContext::new("image: ${IMAGE}\ntag: ${TAG}\nlevel: ${LOG_LEVEL}\n");
    let pipeline = ctx.pipeline(FailAt::Nowhere).with_env([
        ("TAG".to_string(), "latest".to_string()),
        ("LOG_LEVEL".to_string(), "debug".to_string()),
    ]);

    let rendered = pipeline.render(&tag("20240101T000000Z")).unwrap();
    assert_eq!(
        rendered,
        "image: ghcr.io/acme/application-api:20240101T000000Z\ntag: 20240101T000000Z\nlevel: debug\n"
    );
    assert!(ctx.calls().is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn test_environment_with_non_utf8_value_renders() {
    use std::{ffi::OsStr, os::unix::ffi::OsStrExt};

    let ctx = TestContext::new("image: ${IMAGE}\nuser: ${SHIPWRIGHT_TEST_RENDER_USER}\n");
    // SAFETY: the variables are unique to this test.
    unsafe {
        std::env::set_var("SHIPWRIGHT_TEST_RENDER_BINARY", OsStr::from_bytes(b"\xc3\x28"));
        std::env::set_var("SHIPWRIGHT_TEST_RENDER_USER", "deployer");
    }

    let (backend, cluster) = ctx.fakes(FailAt::Nowhere);
    let pipeline = Pipeline::new(ctx.config(), backend, cluster).unwrap();
    let rendered = pipeline.render(&tag("20240101T000000Z"));

    unsafe {
        std::env::remove_var("SHIPWRIGHT_TEST_RENDER_BINARY");
        std::env::remove_var("SHIPWRIGHT_TEST_RENDER_USER");
    }
    assert_eq!(
        rendered.unwrap(),
        "image: ghcr.io/acme/application-api:20240101T000000Z\nuser: deployer\n"
    );
}

#[tokio::test]
async fn test_invalid_config_rejected_before_any_stage() {
    let ctx = TestContext::new(MANIFEST);

    let mut config = ctx.config();
    config.report.workspace = None;

    let (backend, cluster) = ctx.fakes(FailAt::Nowhere);
    let err = Pipeline::new(config, backend, cluster).err().unwrap();

    assert!(matches!(err, PipelineError::Config(_)));
    assert!(ctx.calls().is_empty());
}

#[tokio::test]
async fn test_no_endpoints_configured() {
    let ctx = TestContext::new(MANIFEST);
    let mut config = ctx.config();
    config.report.workspace = None;
    config.report.endpoints.clear();

    let report = ctx
        .pipeline_with(config, FailAt::Nowhere)
        .run_with(options("20240101T000000Z"))
        .await
        .unwrap();
    assert!(report.endpoints.is_empty());
}

#[tokio::test]
async fn test_directory_manifest_applied_as_one_stream() {
    let ctx = TestContext::new(MANIFEST);
    let manifests = ctx.dir.path().join("k8s");
    std::fs::create_dir(&manifests).unwrap();
    std::fs::write(
        manifests.join("10-service.yaml"),
        "kind: Service\nmetadata:\n  name: application-api\n",
    )
    .unwrap();
    std::fs::write(manifests.join("00-deployment.yaml"), "image: ${IMAGE}\n").unwrap();

    let mut config = ctx.config();
    config.cluster.manifest = manifests;

    let report = ctx
        .pipeline_with(config, FailAt::Nowhere)
        .run_with(options("20240101T000000Z"))
        .await
        .unwrap();

    let applied: Vec<_> = ctx
        .calls()
        .into_iter()
        .filter(|call| matches!(call, Call::Apply(_)))
        .collect();
    assert_eq!(applied.len(), 1);
    assert!(report.manifest.starts_with(
        "image: ghcr.io/acme/application-api:20240101T000000Z\n---\nkind: Service"
    ));
}

#[tokio::test]
async fn test_state_dir_excluded_from_build_context() {
    let ctx = TestContext::new(MANIFEST);
    let pipeline = ctx.pipeline(FailAt::Nowhere);
    pipeline.run_with(options("20240101T000000Z")).await.unwrap();

    let requests = ctx.requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].source_dir, ctx.dir.path());
    assert_eq!(requests[0].exclude, vec![PathBuf::from(".shipwright")]);
    assert_eq!(requests[0].spec.binary, "application-api");
}
