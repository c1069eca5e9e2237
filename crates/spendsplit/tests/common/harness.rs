//! Test harness for isolated end-to-end runs.
//!
//! Each `TestHarness` owns a temporary directory holding a fresh database
//! seeded with a couple of partners, a solo user and a small category
//! catalog. The service runs against a `ScriptedGenerationClient`.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use spendsplit::db::spending_repo::{self, CommittedSpending};
use spendsplit::db::{category_repo, user_repo, Database};
use spendsplit::{
    CategorizationService, JobReport, ScriptedGenerationClient, ServiceSettings, SubmitRequest,
};

pub const ALICE: i64 = 1;
pub const BOB: i64 = 2;
pub const CAROL: i64 = 3;

const WAIT_TIMEOUT: Duration = Duration::from_secs(10);
const WAIT_STEP: Duration = Duration::from_millis(10);

pub struct TestHarness {
    /// Keeps the database file alive for the harness lifetime.
    _temp_dir: TempDir,
    pub db: Database,
    pub client: Arc<ScriptedGenerationClient>,
    service: Option<CategorizationService>,
}

impl TestHarness {
    /// Harness with one worker and three attempts per job.
    pub fn new() -> Self {
        Self::with_settings(ServiceSettings {
            worker_count: 1,
            queue_capacity: 64,
            max_attempts: 3,
            stale_job_timeout: Duration::from_secs(900),
        })
    }

    pub fn with_settings(settings: ServiceSettings) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db = Database::open(&temp_dir.path().join("data").join("spendsplit.db"))
            .expect("Failed to open database");
        seed(&db);

        let client = Arc::new(ScriptedGenerationClient::new());
        let service = CategorizationService::start(db.clone(), client.clone(), settings)
            .expect("Failed to start service");

        Self {
            _temp_dir: temp_dir,
            db,
            client,
            service: Some(service),
        }
    }

    pub fn service(&self) -> &CategorizationService {
        self.service.as_ref().expect("service already stopped")
    }

    pub fn submit(&self, request: SubmitRequest) -> String {
        self.service().submit(request).expect("submission accepted")
    }

    /// Polls until the job reaches a terminal status.
    pub fn wait_for_terminal(&self, job_id: &str) -> JobReport {
        let deadline = Instant::now() + WAIT_TIMEOUT;
        loop {
            let report = self.service().status(job_id).expect("job exists");
            if report.job.status.is_terminal() {
                return report;
            }
            assert!(
                Instant::now() < deadline,
                "job {} still {} after {:?}",
                job_id,
                report.job.status,
                WAIT_TIMEOUT
            );
            std::thread::sleep(WAIT_STEP);
        }
    }

    pub fn spendings(&self, job_id: &str) -> Vec<CommittedSpending> {
        spending_repo::find_for_job(&self.db, job_id).expect("spendings readable")
    }

    /// Finishes queued work and stops the workers.
    pub fn drain(&mut self) {
        if let Some(service) = self.service.take() {
            service.drain();
        }
    }
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        if let Some(service) = self.service.take() {
            service.shutdown();
        }
    }
}

fn seed(db: &Database) {
    user_repo::insert(db, ALICE, "Alice").expect("seed user");
    user_repo::insert(db, BOB, "Bob").expect("seed user");
    user_repo::insert(db, CAROL, "Carol").expect("seed user");
    user_repo::link_partners(db, ALICE, BOB).expect("link partners");

    category_repo::insert(db, "Eating Out", Some("restaurants, cafes, takeaway"))
        .expect("seed category");
    category_repo::insert(db, "Groceries", Some("supermarket food and drink"))
        .expect("seed category");
    category_repo::insert(db, "Household", None).expect("seed category");
}
