//! Integration tests for the container build orchestrator

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::{stream, StreamExt};
    use k6x_builder::docker::DockerConnector;
    use k6x_builder::*;
    use k6x_config::constants::{ARTIFACT_PREFIX, BUILDER_IMAGE, CACHE_PATH, CACHE_VOLUME};
    use k6x_errors::{BuildError, Error, RuntimeError};
    use k6x_types::{Engine, Module, Modules, Platform};
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Step {
        Create,
        Start,
        Wait,
        Copy,
        Remove,
    }

    #[derive(Default)]
    struct Script {
        fail: Vec<Step>,
        hang_wait: bool,
        pull: Vec<Result<serde_json::Value, Error>>,
        logs: Vec<Result<LogChunk, Error>>,
        archive: Vec<u8>,
    }

    #[derive(Clone, Default)]
    struct Calls(Arc<Mutex<Vec<String>>>);

    impl Calls {
        fn push(&self, call: impl Into<String>) {
            self.0.lock().unwrap().push(call.into());
        }

        fn all(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }

        fn count(&self, name: &str) -> usize {
            self.all().iter().filter(|c| c.as_str() == name).count()
        }
    }

    struct FakeRuntime {
        calls: Calls,
        specs: Arc<Mutex<Vec<ContainerSpec>>>,
        script: Mutex<Script>,
    }

    fn failure(step: Step) -> Error {
        let name = match step {
            Step::Create => "create",
            Step::Start => "start",
            Step::Wait => "wait",
            Step::Copy => "copy",
            Step::Remove => "remove",
        };
        RuntimeError::operation(name, "injected").into()
    }

    impl FakeRuntime {
        fn new(script: Script) -> (Self, Calls, Arc<Mutex<Vec<ContainerSpec>>>) {
            let calls = Calls::default();
            let specs = Arc::new(Mutex::new(Vec::new()));
            let runtime = Self {
                calls: calls.clone(),
                specs: Arc::clone(&specs),
                script: Mutex::new(script),
            };
            (runtime, calls, specs)
        }

        fn fails(&self, step: Step) -> bool {
            self.script.lock().unwrap().fail.contains(&step)
        }
    }

    #[async_trait]
    impl ContainerRuntime for FakeRuntime {
        async fn ping(&self) -> Result<(), Error> {
            self.calls.push("ping");
            Ok(())
        }

        fn pull_image(&self, image: &str) -> RecordStream {
            assert_eq!(image, BUILDER_IMAGE);
            self.calls.push("pull");
            let records = std::mem::take(&mut self.script.lock().unwrap().pull);
            stream::iter(records).boxed()
        }

        async fn create_container(&self, spec: &ContainerSpec) -> Result<String, Error> {
            self.calls.push("create");
            self.specs.lock().unwrap().push(spec.clone());
            if self.fails(Step::Create) {
                return Err(failure(Step::Create));
            }
            Ok("c0ffee".to_string())
        }

        async fn start_container(&self, id: &str) -> Result<(), Error> {
            assert_eq!(id, "c0ffee");
            self.calls.push("start");
            if self.fails(Step::Start) {
                return Err(failure(Step::Start));
            }
            Ok(())
        }

        fn wait_container(&self, _id: &str) -> WaitSignals {
            self.calls.push("wait");
            let (senders, signals) = WaitSignals::channel();
            if self.script.lock().unwrap().hang_wait {
                let task = tokio::spawn(async move {
                    let _senders = senders;
                    std::future::pending::<()>().await;
                });
                return signals.with_task(task);
            }
            if self.fails(Step::Wait) {
                let _ = senders.error.send(failure(Step::Wait));
            } else {
                let _ = senders.status.send(0);
            }
            signals
        }

        fn container_logs(&self, _id: &str) -> LogStream {
            self.calls.push("logs");
            let logs = std::mem::take(&mut self.script.lock().unwrap().logs);
            stream::iter(logs).boxed()
        }

        fn download_archive(&self, _id: &str, path: &str) -> ByteStream {
            assert_eq!(path, "/home/k6x");
            self.calls.push("copy");
            if self.fails(Step::Copy) {
                return stream::iter(vec![Err(failure(Step::Copy))]).boxed();
            }
            let archive = std::mem::take(&mut self.script.lock().unwrap().archive);
            // Split into small chunks to exercise incremental reading
            let chunks: Vec<Result<Bytes, Error>> = archive
                .chunks(100)
                .map(|c| Ok(Bytes::copy_from_slice(c)))
                .collect();
            stream::iter(chunks).boxed()
        }

        async fn remove_container(&self, id: &str) -> Result<(), Error> {
            assert_eq!(id, "c0ffee");
            self.calls.push("remove");
            if self.fails(Step::Remove) {
                return Err(failure(Step::Remove));
            }
            Ok(())
        }
    }

    struct FakeConnector {
        outcome: Mutex<Option<Result<FakeRuntime, Error>>>,
        ping_fails: bool,
    }

    struct PingFailing(FakeRuntime);

    #[async_trait]
    impl ContainerRuntime for PingFailing {
        async fn ping(&self) -> Result<(), Error> {
            Err(RuntimeError::Unreachable {
                message: "no answer".to_string(),
            }
            .into())
        }
        fn pull_image(&self, image: &str) -> RecordStream {
            self.0.pull_image(image)
        }
        async fn create_container(&self, spec: &ContainerSpec) -> Result<String, Error> {
            self.0.create_container(spec).await
        }
        async fn start_container(&self, id: &str) -> Result<(), Error> {
            self.0.start_container(id).await
        }
        fn wait_container(&self, id: &str) -> WaitSignals {
            self.0.wait_container(id)
        }
        fn container_logs(&self, id: &str) -> LogStream {
            self.0.container_logs(id)
        }
        fn download_archive(&self, id: &str, path: &str) -> ByteStream {
            self.0.download_archive(id, path)
        }
        async fn remove_container(&self, id: &str) -> Result<(), Error> {
            self.0.remove_container(id).await
        }
    }

    impl FakeConnector {
        fn ok(runtime: FakeRuntime) -> Self {
            Self {
                outcome: Mutex::new(Some(Ok(runtime))),
                ping_fails: false,
            }
        }

        fn err(err: impl Into<Error>) -> Self {
            Self {
                outcome: Mutex::new(Some(Err(err.into()))),
                ping_fails: false,
            }
        }
    }

    #[async_trait]
    impl RuntimeConnector for FakeConnector {
        async fn connect(&self) -> Result<Box<dyn ContainerRuntime>, Error> {
            let outcome = self.outcome.lock().unwrap().take();
            match outcome {
                Some(Ok(runtime)) if self.ping_fails => Ok(Box::new(PingFailing(runtime))),
                Some(Ok(runtime)) => Ok(Box::new(runtime)),
                Some(Err(err)) => Err(err),
                None => Err(RuntimeError::Connection {
                    message: "no more connections".to_string(),
                }
                .into()),
            }
        }
    }

    fn archive(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o755);
            header.set_entry_type(tar::EntryType::Regular);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap()
    }

    fn artifact_archive() -> Vec<u8> {
        archive(&[
            ("k6x/k6", &b"B1-binary"[..]),
            ("k6x/README", &b"B2"[..]),
            ("k6x/k6-extra", &b"B3"[..]),
        ])
    }

    fn modules() -> Modules {
        vec![
            Module::new("k6", "v0.49.0"),
            Module::new("github.com/grafana/xk6-faker", "v0.3.0"),
        ]
        .into()
    }

    async fn run_build(
        runtime: FakeRuntime,
        platform: Option<&Platform>,
        verbose: bool,
    ) -> (Result<(), Error>, Vec<u8>) {
        let session_token = CancellationToken::new();
        let session = BuildSession::new(Box::new(runtime), &session_token, verbose);
        let mut out = Vec::new();
        let result = session.run(platform, &modules(), &mut out).await;
        (result, out)
    }

    #[tokio::test]
    async fn test_successful_build_lifecycle() {
        let (runtime, calls, specs) = FakeRuntime::new(Script {
            archive: artifact_archive(),
            ..Script::default()
        });

        let platform = Platform::new("linux", "amd64");
        let (result, out) = run_build(runtime, Some(&platform), false).await;

        result.unwrap();
        assert_eq!(out, b"B1-binaryB3");
        assert_eq!(
            calls.all(),
            vec!["pull", "create", "start", "wait", "copy", "remove"]
        );

        let spec = specs.lock().unwrap()[0].clone();
        assert_eq!(spec.image, BUILDER_IMAGE);
        assert_eq!(spec.env, vec!["GOOS=linux", "GOARCH=amd64"]);
        assert_eq!(
            spec.cmd,
            vec![
                "build",
                "--with",
                "k6 v0.49.0",
                "--with",
                "github.com/grafana/xk6-faker v0.3.0"
            ]
        );
        assert!(!spec.tty);
        assert_eq!(
            spec.mounts,
            vec![VolumeMount {
                source: CACHE_VOLUME.to_string(),
                target: CACHE_PATH.to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_missing_platform_targets_host() {
        let (runtime, _calls, specs) = FakeRuntime::new(Script {
            archive: artifact_archive(),
            ..Script::default()
        });

        let (result, _) = run_build(runtime, None, false).await;

        result.unwrap();
        assert_eq!(specs.lock().unwrap()[0].env, Platform::host().env());
    }

    #[tokio::test]
    async fn test_create_failure_skips_removal() {
        let (runtime, calls, _) = FakeRuntime::new(Script {
            fail: vec![Step::Create],
            ..Script::default()
        });

        let (result, out) = run_build(runtime, None, false).await;

        assert_eq!(result.unwrap_err().to_string(), failure(Step::Create).to_string());
        assert!(out.is_empty());
        assert_eq!(calls.count("remove"), 0);
    }

    #[tokio::test]
    async fn test_failures_after_create_remove_exactly_once() {
        for step in [Step::Start, Step::Wait, Step::Copy] {
            let (runtime, calls, _) = FakeRuntime::new(Script {
                fail: vec![step, Step::Remove],
                archive: artifact_archive(),
                ..Script::default()
            });

            let (result, _) = run_build(runtime, None, false).await;
            let err = result.unwrap_err();

            assert_eq!(calls.count("remove"), 1, "{step:?}");
            assert_ne!(err.to_string(), failure(Step::Remove).to_string(), "{step:?}");
            if step != Step::Copy {
                assert_eq!(err.to_string(), failure(step).to_string());
            }
        }
    }

    #[tokio::test]
    async fn test_removal_error_surfaces_alone() {
        let (runtime, calls, _) = FakeRuntime::new(Script {
            fail: vec![Step::Remove],
            archive: artifact_archive(),
            ..Script::default()
        });

        let (result, out) = run_build(runtime, None, false).await;

        assert_eq!(result.unwrap_err().to_string(), failure(Step::Remove).to_string());
        assert_eq!(out, b"B1-binaryB3");
        assert_eq!(calls.count("remove"), 1);
    }

    #[tokio::test]
    async fn test_bad_pull_record_does_not_fail_build() {
        let (runtime, calls, _) = FakeRuntime::new(Script {
            pull: vec![
                Ok(json!({"status": "Downloading", "progress": "[=>   ]", "id": "a"})),
                Err(Error::internal("JSON error: expected value at line 1 column 1")),
                Ok(json!({"status": "never read"})),
            ],
            archive: artifact_archive(),
            ..Script::default()
        });

        let (result, out) = run_build(runtime, None, false).await;

        result.unwrap();
        assert_eq!(out, b"B1-binaryB3");
        assert_eq!(calls.count("create"), 1);
    }

    #[tokio::test]
    async fn test_pull_stops_at_first_error() {
        let mut records = stream::iter(vec![
            Ok(json!({"progress": "[==> ]"})),
            Err(Error::internal("bad record")),
            Ok(json!({"status": "Pull complete"})),
        ]);

        let summary = drain_pull_progress(&mut records).await;

        assert_eq!(summary.progress, 1);
        assert_eq!(summary.status, 0);
        assert!(summary.aborted.is_some());
        assert_eq!(records.count().await, 1);
    }

    #[tokio::test]
    async fn test_logs_drained_only_when_verbose() {
        let (runtime, calls, _) = FakeRuntime::new(Script {
            archive: artifact_archive(),
            ..Script::default()
        });
        run_build(runtime, None, false).await.0.unwrap();
        assert_eq!(calls.count("logs"), 0);

        let (runtime, calls, _) = FakeRuntime::new(Script {
            archive: artifact_archive(),
            logs: vec![
                Ok(LogChunk::Stdout(Bytes::from_static(b"go: downloading\n"))),
                Ok(LogChunk::Stderr(Bytes::from_static(b"warning\n"))),
                Err(RuntimeError::operation("logs", "stream reset").into()),
            ],
            ..Script::default()
        });
        let (result, out) = run_build(runtime, None, true).await;

        result.unwrap();
        assert_eq!(out, b"B1-binaryB3");
        assert_eq!(
            calls.all(),
            vec!["pull", "create", "start", "wait", "logs", "copy", "remove"]
        );
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let (runtime, calls, _) = FakeRuntime::new(Script::default());
        let token = CancellationToken::new();
        token.cancel();

        let mut out = Vec::new();
        let err = BuildSession::new(Box::new(runtime), &token, false)
            .run(None, &modules(), &mut out)
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(calls.count("create"), 0);
    }

    #[tokio::test]
    async fn test_cancelled_while_waiting_leaves_container() {
        let (runtime, calls, _) = FakeRuntime::new(Script {
            hang_wait: true,
            ..Script::default()
        });
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let mut out = Vec::new();
        let err = BuildSession::new(Box::new(runtime), &token, false)
            .run(None, &modules(), &mut out)
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(calls.count("wait"), 1);
        // Removal is raced against the same token and loses
        assert_eq!(calls.count("remove"), 0);
    }

    #[tokio::test]
    async fn test_extract_artifacts_in_archive_order() {
        let data = artifact_archive();
        let chunks: Vec<Result<Bytes, Error>> = data
            .chunks(7)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();

        let mut out = Vec::new();
        let report = extract_artifacts(stream::iter(chunks).boxed(), ARTIFACT_PREFIX, &mut out)
            .await
            .unwrap();

        assert_eq!(out, b"B1-binaryB3");
        assert_eq!(report.files, vec!["k6x/k6", "k6x/k6-extra"]);
        assert_eq!(report.bytes, 11);
    }

    #[test]
    fn test_copy_artifacts_skips_non_regular_entries() {
        let mut builder = tar::Builder::new(Vec::new());

        let mut dir = tar::Header::new_gnu();
        dir.set_entry_type(tar::EntryType::Directory);
        dir.set_size(0);
        dir.set_mode(0o755);
        dir.set_cksum();
        builder.append_data(&mut dir, "k6dir/", std::io::empty()).unwrap();

        let mut link = tar::Header::new_gnu();
        link.set_entry_type(tar::EntryType::Symlink);
        link.set_size(0);
        link.set_mode(0o777);
        builder.append_link(&mut link, "k6-link", "k6").unwrap();

        let mut file = tar::Header::new_gnu();
        file.set_entry_type(tar::EntryType::Regular);
        file.set_size(3);
        file.set_mode(0o755);
        file.set_cksum();
        builder.append_data(&mut file, "k6", &b"bin"[..]).unwrap();

        let data = builder.into_inner().unwrap();
        let mut out = Vec::new();
        let report = copy_artifacts(data.as_slice(), ARTIFACT_PREFIX, &mut out).unwrap();

        assert_eq!(out, b"bin");
        assert_eq!(report.files, vec!["k6"]);
    }

    #[test]
    fn test_empty_archive_copies_nothing() {
        let data = archive(&[("README", &b"docs"[..])]);
        let mut out = Vec::new();
        let report = copy_artifacts(data.as_slice(), ARTIFACT_PREFIX, &mut out).unwrap();

        assert!(out.is_empty());
        assert!(report.files.is_empty());
    }

    #[tokio::test]
    async fn test_probe_runtime_outcomes() {
        let (runtime, calls, _) = FakeRuntime::new(Script::default());
        let found = probe_runtime(&FakeConnector::ok(runtime)).await.unwrap();
        assert!(found.is_some());
        assert_eq!(calls.all(), vec!["ping"]);

        let unreachable = FakeConnector::err(RuntimeError::Connection {
            message: "refused".to_string(),
        });
        assert!(probe_runtime(&unreachable).await.unwrap().is_none());

        let (runtime, _, _) = FakeRuntime::new(Script::default());
        let silent = FakeConnector {
            outcome: Mutex::new(Some(Ok(runtime))),
            ping_fails: true,
        };
        assert!(probe_runtime(&silent).await.unwrap().is_none());

        let misconfigured = FakeConnector::err(RuntimeError::InvalidHost {
            host: "ssh://".to_string(),
            message: "missing host".to_string(),
        });
        let err = probe_runtime(&misconfigured).await.err().unwrap();
        assert!(matches!(err, Error::Runtime(RuntimeError::InvalidHost { .. })));
    }

    struct StaticProbe {
        engine: Engine,
        outcome: fn() -> Result<Probe, Error>,
    }

    struct NamedBuilder(Engine);

    #[async_trait]
    impl Builder for NamedBuilder {
        fn engine(&self) -> Engine {
            self.0
        }

        async fn build(
            &self,
            _cancel: &CancellationToken,
            _platform: Option<&Platform>,
            _modules: &Modules,
            _out: &mut (dyn tokio::io::AsyncWrite + Send + Unpin),
        ) -> Result<(), Error> {
            Ok(())
        }
    }

    #[async_trait]
    impl EngineProbe for StaticProbe {
        fn engine(&self) -> Engine {
            self.engine
        }

        async fn probe(&self) -> Result<Probe, Error> {
            (self.outcome)()
        }
    }

    fn unavailable() -> Result<Probe, Error> {
        Ok(Probe::Unavailable {
            reason: "not running".to_string(),
        })
    }

    fn native_ready() -> Result<Probe, Error> {
        Ok(Probe::Ready(Arc::new(NamedBuilder(Engine::Native))))
    }

    fn misconfigured() -> Result<Probe, Error> {
        Err(RuntimeError::InvalidHost {
            host: "ssh://".to_string(),
            message: "bad".to_string(),
        }
        .into())
    }

    #[tokio::test]
    async fn test_registry_falls_through_unavailable_engines() {
        let mut registry = EngineRegistry::new();
        registry.register(StaticProbe {
            engine: Engine::Docker,
            outcome: unavailable,
        });
        registry.register(StaticProbe {
            engine: Engine::Native,
            outcome: native_ready,
        });

        let builder = registry.select(&[Engine::Docker, Engine::Native]).await.unwrap();
        assert_eq!(builder.engine(), Engine::Native);

        let builder = registry.select(&[]).await.unwrap();
        assert_eq!(builder.engine(), Engine::Native);

        let err = registry.select(&[Engine::Docker]).await.err().unwrap();
        assert!(matches!(
            err,
            Error::Build(BuildError::NoUsableBuilder { ref tried }) if tried == "docker"
        ));
    }

    #[tokio::test]
    async fn test_missing_docker_socket_falls_through_to_next_engine() {
        let absent = DockerConnector::with_host("unix:///nonexistent/k6x/docker.sock");
        assert!(probe_runtime(&absent).await.unwrap().is_none());

        let mut registry = EngineRegistry::new();
        registry.register(ContainerProbe::new(Engine::Docker, Arc::new(absent)));
        registry.register(StaticProbe {
            engine: Engine::Native,
            outcome: native_ready,
        });

        let builder = registry
            .select(&[Engine::Docker, Engine::Native])
            .await
            .unwrap();
        assert_eq!(builder.engine(), Engine::Native);
    }

    #[tokio::test]
    async fn test_registry_surfaces_configuration_errors() {
        let mut registry = EngineRegistry::new();
        registry.register(StaticProbe {
            engine: Engine::Docker,
            outcome: misconfigured,
        });
        registry.register(StaticProbe {
            engine: Engine::Native,
            outcome: native_ready,
        });

        let err = registry
            .select(&[Engine::Docker, Engine::Native])
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Runtime(RuntimeError::InvalidHost { .. })));
    }

    #[tokio::test]
    async fn test_unregistered_engine_is_unavailable() {
        let registry = EngineRegistry::new();
        let err = registry.select(&[Engine::Native]).await.err().unwrap();
        assert!(matches!(err, Error::Build(BuildError::NoUsableBuilder { .. })));
    }

    #[tokio::test]
    async fn test_container_probe_binds_probed_connection() {
        let (runtime, calls, _) = FakeRuntime::new(Script {
            archive: artifact_archive(),
            ..Script::default()
        });
        let mut registry = EngineRegistry::new();
        registry.register(ContainerProbe::new(
            Engine::Docker,
            Arc::new(FakeConnector::ok(runtime)),
        ));

        let builder = registry.select(&[Engine::Docker]).await.unwrap();
        assert_eq!(builder.engine(), Engine::Docker);

        let mut out = Vec::new();
        builder
            .build(&CancellationToken::new(), None, &modules(), &mut out)
            .await
            .unwrap();
        assert_eq!(out, b"B1-binaryB3");
        assert_eq!(
            calls.all(),
            vec!["ping", "pull", "create", "start", "wait", "copy", "remove"]
        );

        // The probed connection is spent; the connector has nothing left
        let err = builder
            .build(&CancellationToken::new(), None, &modules(), &mut Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Runtime(RuntimeError::Connection { .. })));
    }
}
