use crate::categorizer::{CategorizationResult, Category, Person, Rejection};
use crate::worker::job::Job;

pub struct PipelineContext {
    // Input
    pub job: Job,

    // Resolved before the first attempt
    pub submitter: Option<Person>,
    pub co_payer: Option<Person>,
    pub catalog: Vec<Category>,

    // Prompt without feedback; identical for identical inputs
    pub base_prompt: Option<String>,

    // Attempt loop state
    pub attempts: u32,
    pub rejections: Vec<Rejection>,

    // Set once a reply validates
    pub result: Option<CategorizationResult>,

    // Set by a successful commit
    pub spending_ids: Vec<i64>,
}

impl PipelineContext {
    pub fn new(job: Job) -> Self {
        Self {
            job,
            submitter: None,
            co_payer: None,
            catalog: Vec::new(),
            base_prompt: None,
            attempts: 0,
            rejections: Vec::new(),
            result: None,
            spending_ids: Vec::new(),
        }
    }
}
