//! In-memory engine for tests
//!
//! Behaves like a container engine closely enough to run whole pipelines:
//! image ids are deterministic 64 hex strings, every commit advances a fake
//! clock by one second, containers inherit the labels of their image, and
//! command exit codes can be scripted.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use kiln_core::domain::config::StepSpec;
use kiln_core::domain::fingerprint::ConfigFingerprint;
use kiln_core::domain::image::{ImageId, ImageRecord};
use kiln_core::domain::labels::StepLabels;
use kiln_core::domain::progress::ProgressEvent;
use kiln_core::dto::image::{ImageInspect, ImageSummary, InspectConfig};
use kiln_engine::{Archive, Engine, EngineError, ProgressSink, Result};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::AsyncReadExt;

/// Deterministic image id for test number `n`
pub fn image_id(n: u64) -> ImageId {
    ImageId::parse(&format!("{:064x}", n)).unwrap()
}

/// A cache candidate for `spec` at `step`, created at `created_at`
pub fn record(n: u64, step: usize, spec: &StepSpec, created_at: DateTime<Utc>) -> ImageRecord {
    ImageRecord {
        id: image_id(n),
        created_at,
        step_index: step,
        config_fingerprint: ConfigFingerprint::of(spec),
        runtime_seconds: 1.0,
        is_cache_candidate: true,
        config: Some(spec.config_json()),
        extra_labels: BTreeMap::new(),
    }
}

#[derive(Debug, Clone)]
struct FakeImage {
    created: DateTime<Utc>,
    labels: BTreeMap<String, String>,
    /// Image id or pulled reference the image was committed from
    parent: String,
}

#[derive(Debug, Clone)]
struct FakeContainer {
    image: String,
    command: Option<Vec<String>>,
    labels: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
struct State {
    pulled: BTreeSet<String>,
    images: BTreeMap<String, FakeImage>,
    containers: BTreeMap<String, FakeContainer>,
    failing: Vec<(String, i64)>,
    protected: HashSet<String>,
    pulls: Vec<String>,
    commands: Vec<Vec<String>>,
    archives: Vec<(String, Vec<u8>)>,
    removed_images: Vec<String>,
    removed_containers: Vec<String>,
    calls: Vec<String>,
    next_id: u64,
    clock: Option<DateTime<Utc>>,
    wait_delay: Option<Duration>,
    pull_delay: Option<Duration>,
}

/// Engine double keeping all state in memory
#[derive(Debug, Default)]
pub struct FakeEngine {
    state: Mutex<State>,
}

impl FakeEngine {
    pub fn new() -> Self {
        let start = Utc::now() - TimeDelta::seconds(600);
        let start = DateTime::from_timestamp(start.timestamp(), 0).unwrap();
        let engine = Self::default();
        {
            let mut state = engine.state.lock().unwrap();
            state.clock = Some(start);
            state.next_id = 0xa000;
        }
        engine
    }

    /// Makes every command whose line contains `pattern` exit with `code`
    pub fn fail_command(&self, pattern: &str, code: i64) {
        self.state
            .lock()
            .unwrap()
            .failing
            .push((pattern.to_string(), code));
    }

    /// Makes `wait` take this long
    pub fn set_wait_delay(&self, delay: Duration) {
        self.state.lock().unwrap().wait_delay = Some(delay);
    }

    /// Makes every pull take `delay`
    pub fn set_pull_delay(&self, delay: Duration) {
        self.state.lock().unwrap().pull_delay = Some(delay);
    }

    /// Moves an image's creation time into the past
    pub fn age_image(&self, id: &ImageId, by: TimeDelta) {
        let mut state = self.state.lock().unwrap();
        if let Some(image) = state.images.get_mut(id.as_str()) {
            image.created -= by;
        }
    }

    /// Makes removing this image fail with a conflict
    pub fn protect_image(&self, id: &ImageId) {
        self.state
            .lock()
            .unwrap()
            .protected
            .insert(id.to_string());
    }

    /// Deletes an image behind the builder's back
    pub fn vanish_image(&self, id: &ImageId) {
        self.state.lock().unwrap().images.remove(id.as_str());
    }

    /// Stores an image under a raw id, valid or not
    pub fn insert_raw_image(&self, raw_id: &str, labels: BTreeMap<String, String>) {
        let mut state = self.state.lock().unwrap();
        let created = state.tick();
        state.images.insert(
            raw_id.to_string(),
            FakeImage {
                created,
                labels,
                parent: String::new(),
            },
        );
    }

    /// Stores an image as a previous run of `repo` would have left it
    pub fn insert_image(&self, repo: &str, step: usize, spec: &StepSpec) -> ImageId {
        let mut state = self.state.lock().unwrap();
        let id = state.new_id();
        let created = state.tick();
        state.images.insert(
            id.clone(),
            FakeImage {
                created,
                labels: StepLabels::new(repo, step, spec).to_map(2.0),
                parent: String::new(),
            },
        );
        ImageId::parse(&id).unwrap()
    }

    /// Adds a stopped container carrying `labels`
    pub fn insert_container(&self, labels: BTreeMap<String, String>) -> String {
        let mut state = self.state.lock().unwrap();
        let id = format!("ctr{}", state.new_id());
        state.containers.insert(
            id.clone(),
            FakeContainer {
                image: String::new(),
                command: None,
                labels,
            },
        );
        id
    }

    pub fn has_image(&self, id: &ImageId) -> bool {
        self.state.lock().unwrap().images.contains_key(id.as_str())
    }

    pub fn image_count(&self) -> usize {
        self.state.lock().unwrap().images.len()
    }

    /// Image id or reference an image was committed from
    pub fn parent_of(&self, id: &ImageId) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .images
            .get(id.as_str())
            .map(|image| image.parent.clone())
    }

    pub fn live_containers(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .containers
            .keys()
            .cloned()
            .collect()
    }

    pub fn pulls(&self) -> Vec<String> {
        self.state.lock().unwrap().pulls.clone()
    }

    /// Commands of every container created with one, in order
    pub fn commands(&self) -> Vec<Vec<String>> {
        self.state.lock().unwrap().commands.clone()
    }

    /// Destination and bytes of every uploaded archive
    pub fn archives(&self) -> Vec<(String, Vec<u8>)> {
        self.state.lock().unwrap().archives.clone()
    }

    pub fn removed_images(&self) -> Vec<String> {
        self.state.lock().unwrap().removed_images.clone()
    }

    pub fn removed_containers(&self) -> Vec<String> {
        self.state.lock().unwrap().removed_containers.clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    fn record_call(&self, call: String) -> std::sync::MutexGuard<'_, State> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        state
    }
}

impl State {
    fn new_id(&mut self) -> String {
        self.next_id += 1;
        format!("{:064x}", self.next_id)
    }

    fn tick(&mut self) -> DateTime<Utc> {
        let now = self.clock.unwrap_or_else(Utc::now) + TimeDelta::seconds(1);
        self.clock = Some(now);
        now
    }
}

fn matches_filter(labels: &BTreeMap<String, String>, filter: &str) -> bool {
    match filter.split_once('=') {
        Some((key, value)) => labels.get(key).is_some_and(|v| v == value),
        None => labels.contains_key(filter),
    }
}

fn not_found(what: &str) -> EngineError {
    EngineError::NotFound(what.to_string())
}

#[async_trait]
impl Engine for FakeEngine {
    async fn list_images(&self, label_filter: &str) -> Result<Vec<ImageSummary>> {
        let state = self.record_call(format!("images {}", label_filter));
        Ok(state
            .images
            .iter()
            .filter(|(_, image)| matches_filter(&image.labels, label_filter))
            .map(|(id, image)| ImageSummary {
                id: format!("sha256:{}", id),
                created: image.created.timestamp(),
                labels: Some(image.labels.clone()),
            })
            .collect())
    }

    async fn list_containers(&self, label_filter: &str) -> Result<Vec<String>> {
        let state = self.record_call(format!("ps {}", label_filter));
        Ok(state
            .containers
            .iter()
            .filter(|(_, container)| matches_filter(&container.labels, label_filter))
            .map(|(id, _)| id.clone())
            .collect())
    }

    async fn pull(
        &self,
        repository: &str,
        tag: &str,
        progress: &mut dyn ProgressSink,
    ) -> Result<()> {
        let reference = format!("{}:{}", repository, tag);
        let delay = {
            let mut state = self.record_call(format!("pull {}", reference));
            state.pulls.push(reference.clone());
            state.pulled.insert(reference.clone());
            state.pull_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        progress.write(ProgressEvent::Pull(format!("{}: Pulling from library/{}", tag, repository)));
        progress.write(ProgressEvent::Pull(format!("Status: Downloaded newer image for {}", reference)));
        Ok(())
    }

    async fn create_container(&self, image: &str, command: Option<&[String]>) -> Result<String> {
        let mut state = self.record_call(format!("create {}", image));

        let labels = match state.images.get(image) {
            Some(found) => found.labels.clone(),
            None if state.pulled.contains(image) => BTreeMap::new(),
            None => return Err(not_found(image)),
        };

        let id = format!("ctr{}", state.new_id());
        if let Some(command) = command {
            state.commands.push(command.to_vec());
        }
        state.containers.insert(
            id.clone(),
            FakeContainer {
                image: image.to_string(),
                command: command.map(<[String]>::to_vec),
                labels,
            },
        );
        Ok(id)
    }

    async fn start(&self, container_id: &str) -> Result<()> {
        let state = self.record_call(format!("start {}", container_id));
        if !state.containers.contains_key(container_id) {
            return Err(not_found(container_id));
        }
        Ok(())
    }

    async fn attach_stream(
        &self,
        container_id: &str,
        output: &mut dyn ProgressSink,
    ) -> Result<()> {
        let line = {
            let state = self.record_call(format!("logs {}", container_id));
            let container = state
                .containers
                .get(container_id)
                .ok_or_else(|| not_found(container_id))?;
            container
                .command
                .as_ref()
                .and_then(|argv| argv.last().cloned())
        };
        if let Some(line) = line {
            output.write(ProgressEvent::Output(line));
        }
        Ok(())
    }

    async fn wait(&self, container_id: &str) -> Result<i64> {
        let (code, delay) = {
            let state = self.record_call(format!("wait {}", container_id));
            let container = state
                .containers
                .get(container_id)
                .ok_or_else(|| not_found(container_id))?;
            let line = container
                .command
                .as_ref()
                .map(|argv| argv.join(" "))
                .unwrap_or_default();
            let code = state
                .failing
                .iter()
                .find(|(pattern, _)| line.contains(pattern.as_str()))
                .map(|(_, code)| *code)
                .unwrap_or(0);
            (code, state.wait_delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(code)
    }

    async fn commit(
        &self,
        container_id: &str,
        labels: &BTreeMap<String, String>,
        _repository: Option<&str>,
    ) -> Result<String> {
        let mut state = self.record_call(format!("commit {}", container_id));
        let container = state
            .containers
            .get(container_id)
            .cloned()
            .ok_or_else(|| not_found(container_id))?;

        let mut merged = container.labels;
        merged.extend(labels.iter().map(|(k, v)| (k.clone(), v.clone())));

        let id = state.new_id();
        let created = state.tick();
        state.images.insert(
            id.clone(),
            FakeImage {
                created,
                labels: merged,
                parent: container.image,
            },
        );
        Ok(format!("sha256:{}", id))
    }

    async fn inspect_image(&self, image_id: &str) -> Result<ImageInspect> {
        let state = self.record_call(format!("inspect {}", image_id));
        let image = state
            .images
            .get(image_id)
            .ok_or_else(|| not_found(image_id))?;
        let created = image.created + TimeDelta::milliseconds(123);
        Ok(ImageInspect {
            id: format!("sha256:{}", image_id),
            created: created.to_rfc3339_opts(SecondsFormat::Nanos, true),
            config: Some(InspectConfig {
                labels: Some(image.labels.clone()),
            }),
        })
    }

    async fn remove_container(&self, container_id: &str) -> Result<()> {
        let mut state = self.record_call(format!("rm {}", container_id));
        if state.containers.remove(container_id).is_some() {
            state.removed_containers.push(container_id.to_string());
        }
        Ok(())
    }

    async fn remove_image(&self, image_id: &str) -> Result<()> {
        let mut state = self.record_call(format!("rmi {}", image_id));
        if state.protected.contains(image_id) {
            return Err(EngineError::command_failed(
                format!("rmi {}", image_id),
                Some(1),
                "conflict: unable to remove repository reference",
            ));
        }
        if state.images.remove(image_id).is_some() {
            state.removed_images.push(image_id.to_string());
        }
        Ok(())
    }

    async fn put_archive(
        &self,
        container_id: &str,
        dest_path: &str,
        mut archive: Archive,
        progress: &mut dyn ProgressSink,
    ) -> Result<()> {
        {
            let state = self.record_call(format!("cp {}:{}", container_id, dest_path));
            if !state.containers.contains_key(container_id) {
                return Err(not_found(container_id));
            }
        }

        let mut bytes = Vec::new();
        archive.reader.read_to_end(&mut bytes).await?;
        progress.write(ProgressEvent::Upload {
            sent: bytes.len() as u64,
            total: archive.size,
        });

        self.state
            .lock()
            .unwrap()
            .archives
            .push((dest_path.to_string(), bytes));
        Ok(())
    }
}
