//! Auxiliary LLM calls around the main conversation: preliminary task
//! hints, expected-answer-type classification, and the final boxed-answer
//! extraction. All run against the dedicated extraction model with slow
//! exponential-backoff retries; every failure is survivable.

use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

use mf_domain::error::{Error, Result};
use mf_domain::tool::Message;
use mf_history::History;
use mf_providers::retry::{retry, Backoff};
use mf_providers::LlmClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerType {
    Number,
    Date,
    Time,
    Text,
}

/// Backoff for the auxiliary calls: slower than the in-loop policy, since
/// nothing is waiting on these but rate limits are common.
fn aux_backoff() -> Backoff {
    Backoff {
        max_attempts: 5,
        base: Duration::from_secs(15),
        factor: 2.0,
        cap: Duration::from_secs(240),
    }
}

/// One-shot prompt → response text against the extraction model. Empty
/// responses count as failures so the retry loop re-asks.
async fn ask(client: &Arc<dyn LlmClient>, prompt: &str) -> Result<String> {
    let client = client.clone();
    let prompt = prompt.to_string();
    retry(aux_backoff(), move || {
        let client = client.clone();
        let prompt = prompt.clone();
        async move {
            let mut history = History::new();
            history.append(Message::user(&prompt));
            let response = client.send_request("", &history, &[], -1).await?;
            let text = response.content.trim().to_string();
            if text.is_empty() {
                return Err(Error::Other("extraction model returned empty result".into()));
            }
            Ok(text)
        }
    })
    .await
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Hints
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const HINTS_INSTRUCTION: &str = "Carefully analyze the given task description (question) \
without attempting to solve it directly. Your role is to identify potential challenges and \
areas that require special attention during the solving process, and provide practical \
guidance for someone who will solve this task by actively gathering and analyzing \
information.\n\n\
Identify and concisely list key points in the question that could potentially impact \
subsequent information collection or the accuracy and completeness of the solution, \
especially those likely to cause mistakes, carelessness, or confusion during \
problem-solving.\n\n\
The question author does not intend to set traps or intentionally create confusion. \
Interpret the question in the most common, reasonable, and straightforward manner. \
However, be aware that mistakes, imprecise wording, or inconsistencies may exist due to \
carelessness or limited subject expertise rather than intentional ambiguity.\n\n\
Also consider flagging issues such as:\n\
- Potential mistakes or oversights introduced unintentionally by the question author.\n\
- Terms or instructions with multiple valid interpretations due to ambiguity, \
imprecision, outdated terminology, or subtle wording nuances.\n\
- Numeric precision, rounding requirements, formatting, or units that might be unclear, \
erroneous, or inconsistent with standard practice or provided examples.\n\
- Contradictions between explicit textual instructions and examples or contextual clues \
within the question itself.\n\n\
Do NOT attempt to guess or infer correct answers, as complete factual information is not \
yet available. Your responsibility is purely analytical. Avoid overanalyzing or listing \
trivial details that would not materially affect the task outcome.\n\n\
Here is the question:\n\n";

/// Analyse the task and produce preliminary notes for the main agent.
pub async fn extract_hints(client: &Arc<dyn LlmClient>, task_description: &str) -> Result<String> {
    ask(client, &format!("{HINTS_INSTRUCTION}{task_description}")).await
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Answer-type classification
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Classify the expected answer shape of a task.
pub async fn classify_answer_type(
    client: &Arc<dyn LlmClient>,
    task_description: &str,
) -> Result<AnswerType> {
    let prompt = format!(
        "Input:\n`{task_description}`\n\n\
         Question:\n\
         Determine the expected data type of the answer. For questions asking to \
         \"identify\" something, focus on the final answer type, not the identification \
         process. Format requirements in the question often hint at the expected data \
         type. If the question asks you to write a specific word, return string. Choose \
         only one of the four types below:\n\
         - number — a pure number (may include decimals or signs), e.g., price, distance, length\n\
         - date   — a specific calendar date (e.g., 2025-08-05 or August 5, 2025)\n\
         - time   — a specific time of day or formatted time cost (e.g., 14:30 or 1:30.12)\n\
         - string — any other textual answer\n\n\
         Output:\n\
         Return exactly one of the [number, date, time, string], nothing else.\n"
    );

    let text = ask(client, &prompt).await?;
    Ok(match text.trim().to_lowercase().as_str() {
        "number" => AnswerType::Number,
        "date" => AnswerType::Date,
        "time" => AnswerType::Time,
        _ => AnswerType::Text,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Boxed-answer extraction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn extraction_preamble(task_description: &str, summary: &str) -> String {
    format!(
        "# Inputs\n\n\
         * **Original Question**: `{task_description}`\n\
         * **Agent Summary**: `{summary}`\n\n\
         ---\n\n\
         # Task\n\n\
         1. **Independently derive** the best possible answer, step by step, based solely \
         on evidence and reasoning from the Agent Summary. **Ignore the summary's \"Final \
         Answer\" field** at this stage.\n\
         2. **Compare** your derived answer to the final answer provided in the Agent \
         Summary. If both are well supported, choose the one with stronger or clearer \
         support; if only one is well supported, use that one.\n\
         3. **Revise** your chosen answer to fully satisfy all formatting rules below. \
         These rules override the original question if there is any conflict.\n\n\
         If no answer is clearly supported by the evidence, provide a well-justified \
         educated guess. **Always wrap your final answer in a non-empty \\boxed{{...}}.**\n\n\
         ---\n\n"
    )
}

fn type_rules(answer_type: AnswerType) -> &'static str {
    match answer_type {
        AnswerType::Number => {
            "# Output Guidelines\n\n\
             1. **Box the answer**: wrap it in `\\boxed{}`.\n\
             2. **Answer type**: the boxed content must be a single number.\n\
             3. **Formatting rules**\n\
             * Follow every formatting instruction in the original question (units, \
             rounding, decimal places, etc.).\n\
             * Use digits only; no words, commas, or symbols (e.g., \"$\", \"%\", \"/\").\n\
             * Do not add units unless required; ensure the correct unit scale (if the \
             question asks for \"thousand hours\", output 13, not 13000).\n\
             * If the question's written precision conflicts with its examples, match \
             the examples.\n\
             * Convert text-based numbers fully (\"one hundred million\" → 100000000).\n\n\
             Quick reference: $100 → 100; 70% → 70; ¥1,000 → 1000; 0.045 m³ → 0.045; \
             −40 °C → -40; 13 thousand hours → 13; 100 million → 100000000.\n"
        }
        AnswerType::Time => {
            "# Output Guidelines\n\n\
             1. **Box the answer**: wrap it in `\\boxed{}`.\n\
             2. **Answer type**: the boxed content must be a time.\n\
             3. **Formatting rules**\n\
             * Follow every formatting instruction in the original question (rounding, \
             decimal places, etc.).\n\
             * Do not add units (\"s\", \"seconds\") unless required; watch the unit \
             scale (hours versus thousand hours).\n\
             * If the question's written precision conflicts with its examples, treat \
             the examples as authoritative — match their decimal places and rounding.\n\n\
             Quick reference: with an example showing \"0.001\", 1:23.4567 → 1:23.457; \
             with an example keeping seconds (\"0:45\"), 3:44.8 → 3:45.\n"
        }
        AnswerType::Date | AnswerType::Text => {
            "# Output Guidelines\n\n\
             1. **Box the answer**: wrap it in `\\boxed{}`.\n\
             2. **Answer type**: a single short phrase, or a comma-separated list of \
             numbers and/or strings.\n\
             3. **Formatting rules**\n\
             * Follow every formatting instruction in the original question \
             (alphabetization, sequencing, units, rounding).\n\
             * Omit articles and abbreviations unless explicitly expected; no trailing \
             punctuation; standard ASCII quotes only.\n\
             * Keep the answer as short as possible: bare nouns (no \"count of\"), common \
             names (\"China\", \"Brunei\", \"United States\"), first + last name only, \
             simplest accepted term (\"diamond\", not \"crystalline diamond\").\n\
             * For lists, apply the rules item by item.\n\
             * Use historical place names as given in the evidence (a birthplace keeps \
             the name it had at the time of birth).\n\n\
             Quick reference: People's Republic of China → China; John Michael Doe → \
             John Doe; INT. THE CASTLE – DAY 1 → The Castle; Republic of Korea → \
             South Korea.\n"
        }
    }
}

/// Extract the final `\boxed{…}` answer from a summary. Returns the full
/// extraction response (reasoning plus box); the caller pulls the boxed
/// content out with [`boxed_content`].
pub async fn extract_boxed_answer(
    client: &Arc<dyn LlmClient>,
    answer_type: AnswerType,
    task_description: &str,
    summary: &str,
) -> Result<String> {
    let prompt = format!(
        "{}{}\n---\n\n# Output\n\nReturn the step-by-step process and your final answer \
         wrapped in \\boxed{{...}}, checking the formatting rules step by step.\n",
        extraction_preamble(task_description, summary),
        type_rules(answer_type),
    );

    let client2 = client.clone();
    let prompt2 = prompt.clone();
    retry(aux_backoff(), move || {
        let client = client2.clone();
        let prompt = prompt2.clone();
        async move {
            let mut history = History::new();
            history.append(Message::user(&prompt));
            let response = client.send_request("", &history, &[], -1).await?;
            let text = response.content.trim().to_string();
            if text.is_empty() {
                return Err(Error::Other("extraction returned empty result".into()));
            }
            if boxed_content(&text).is_none() {
                return Err(Error::Other("extraction returned no boxed answer".into()));
            }
            Ok(text)
        }
    })
    .await
}

/// The contents of the first `\boxed{…}` in `text`.
pub fn boxed_content(text: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"\\boxed\{([^}]*)\}").unwrap());
    re.captures(text)
        .map(|caps| caps[1].trim().to_string())
        .filter(|s| !s.is_empty())
}
