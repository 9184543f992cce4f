//! Shared server state: the resolved instrument table, the module
//! repository backing it, the task queue + scheduler, and the database
//! connections persistence needs. One [`AppState`] per process, held in
//! an `Arc` behind axum's `State` extractor.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::info;

use obs_core::locator::ModuleRepository;
use obs_core::sim::SimLocatorFactory;
use obs_guide::GuideMatrix;
use obs_queue::{run_scheduler, Executor, TaskQueue};
use obs_store::{establish_connection, run_migrations, DbConnection, FileImageRepository};

use crate::instrument::{Instrument, InstrumentDeviceResolver, InstrumentMap};
use crate::settings::Settings;

/// How often the scheduler scans for runnable pending tasks (§4.E).
const SCHEDULER_POLL_MS_FLOOR: u64 = 50;

/// Everything a running guiding loop needs torn down on `stop`.
pub struct GuidingRun {
    pub handle: JoinHandle<()>,
    pub stop: Arc<AtomicBool>,
}

pub struct AppState {
    pub settings: Settings,
    pub repository: ModuleRepository,
    pub instruments: InstrumentMap,
    pub task_queue: Arc<TaskQueue>,
    pub image_repository: Arc<FileImageRepository>,
    pub db: Arc<Mutex<DbConnection>>,
    /// The inverse-calibration matrix each instrument's guiding loop needs,
    /// populated by a successful `POST .../guider/calibrate` and consumed
    /// by `POST .../guider/start`.
    pub calibration: Mutex<HashMap<String, GuideMatrix>>,
    pub guiding: Mutex<HashMap<String, GuidingRun>>,
}

impl AppState {
    pub async fn new(settings: Settings) -> Result<Arc<AppState>, Box<dyn std::error::Error>> {
        run_migrations(&settings.storage.database_url)?;

        let mut repository = ModuleRepository::new();
        repository.register("sim", Arc::new(SimLocatorFactory));

        let mut instruments = HashMap::new();
        for (name, config) in &settings.instruments {
            let instrument = Instrument::resolve(name, config, &repository).await?;
            instruments.insert(name.clone(), Arc::new(instrument));
            info!(instrument = name.as_str(), "instrument resolved");
        }

        let repo_conn = establish_connection(&settings.storage.database_url).await?;
        let image_repository = Arc::new(FileImageRepository::new(
            PathBuf::from(&settings.storage.image_repository_dir),
            repo_conn,
        ));

        let db = Arc::new(Mutex::new(
            establish_connection(&settings.storage.database_url).await?,
        ));

        let task_queue = Arc::new(TaskQueue::default());

        let executor_conn = establish_connection(&settings.storage.database_url).await?;
        let executor_repository = Arc::new(FileImageRepository::new(
            PathBuf::from(&settings.storage.image_repository_dir),
            executor_conn,
        ));
        let resolver = Arc::new(InstrumentDeviceResolver {
            instruments: instruments.clone(),
        });
        let runner: Arc<dyn obs_queue::TaskRunner> = Arc::new(Executor {
            resolver,
            repository: executor_repository,
            cooler_wait: std::time::Duration::from_secs(120),
            filter_wheel_wait: std::time::Duration::from_secs(
                obs_core::device::filter_wheel::DEFAULT_READINESS_TIMEOUT_SECS,
            ),
        });
        let poll_interval = std::time::Duration::from_millis(
            settings.scheduler_poll_interval_ms.max(SCHEDULER_POLL_MS_FLOOR),
        );
        let scheduler_stop = Arc::new(AtomicBool::new(false));
        tokio::spawn(run_scheduler(
            task_queue.clone(),
            runner,
            poll_interval,
            scheduler_stop,
        ));

        Ok(Arc::new(AppState {
            settings,
            repository,
            instruments,
            task_queue,
            image_repository,
            db,
            calibration: Mutex::new(HashMap::new()),
            guiding: Mutex::new(HashMap::new()),
        }))
    }

    pub fn instrument(&self, name: &str) -> Option<Arc<Instrument>> {
        self.instruments.get(name).cloned()
    }
}
