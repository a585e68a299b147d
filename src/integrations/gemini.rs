use crate::config::GeminiConfig;
use crate::models::{ChatMessage, ChatRole, Priority};
use crate::workspace::Workspace;
use base64::Engine as _;
use chrono::{DateTime, Local};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::Duration;

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const MAX_TOOL_ROUNDS: usize = 8;
const REPORT_THINKING_BUDGET: u32 = 32768;
pub const DEFAULT_ASPECT_RATIO: &str = "1:1";

const ASSISTANT_INSTRUCTION: &str = "\
*** STRATEGIC BUSINESS ASSISTANT ***
You are a hands-on business assistant and strategist. Provide deep analysis and manage the user's workspace.
Style: expert and detailed. NO TABLES.";

const REPORT_INSTRUCTION: &str = "\
Role: you are a professional market analyst, strategy consultant and business advisor to an owner or CEO. \
Deliver the most detailed, practical and strategically useful market analysis you can.

Each of the 12 sections must be expansive and deep: use facts, chains of reasoning and concrete examples.

MANDATORY STRUCTURE (12 SECTIONS):
1. Executive summary: synthesis of the current situation, strategic verdict, critical success factors.
2. Market overview: segmentation, micro-niches, value chain for 2024-2025, hidden customer needs, leader strategies.
3. Russia-specific information: maturity, sanctions, import substitution, logistics hubs, regional demand, talent shortage, regulatory traps.
4. Rest of the world: global benchmarks, Western and Asian models, leaders' technology stack.
5. Key trends and drivers: early signals, hype cycles, macro drivers (economy, demographics).
6. Forecast: optimistic, base and stress scenarios; human capital, institutional change, AI as an efficiency tool.
7. Opportunities for the business: profit zones at 1, 3 and 5 years; points of non-linear growth.
8. Optimization proposals: inefficiency audit, margin leaks, lean AI adoption.
9. Investment opportunities: expected returns, M&A risks, partner ecosystems.
10. How to make money on this: concrete business models, go-to-market, market share capture.
11. Assistant's thoughts: strategic modelling, creative hypotheses, rollout plan, KPIs and risks.
12. What to do today: 1-3 concrete actions that can be taken right now.

STYLE: CEO language, structured, expert, no tables. Markdown only.";

#[derive(Debug, thiserror::Error)]
pub enum GeminiError {
    #[error("Gemini is disabled in config")]
    Disabled,
    #[error("missing Gemini API key")]
    MissingApiKey,
    #[error("Gemini request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Gemini error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("Gemini parse failed: {0}")]
    Decode(String),
    #[error("Gemini returned an empty response")]
    Empty,
    #[error("too many tool rounds without a text reply")]
    ToolLoop,
}

/// Image bytes passed inline with a request.
#[derive(Clone, Debug, PartialEq)]
pub struct InlineImage {
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl InlineImage {
    fn to_part(&self) -> Value {
        json!({
            "inlineData": {
                "mimeType": self.mime_type,
                "data": base64::engine::general_purpose::STANDARD.encode(&self.data),
            }
        })
    }
}

/// Workspace mutations requested by the assistant.
#[derive(Clone, Debug, PartialEq)]
pub enum ToolCall {
    AddTask {
        title: String,
        description: Option<String>,
        priority: Priority,
    },
    AddEvent {
        title: String,
        date: String,
        time: Option<String>,
        description: Option<String>,
        priority: Priority,
    },
    AddNote {
        title: String,
        content: String,
    },
}

#[derive(Clone, Debug)]
pub struct ChatRequest {
    pub session_id: String,
    pub system_instruction: String,
    pub history: Vec<ChatMessage>,
    pub text: String,
    pub attachment: Option<InlineImage>,
}

#[derive(Clone, Debug, Default)]
pub struct ChatReply {
    pub text: String,
    pub grounding_metadata: Option<Value>,
    pub tool_calls: Vec<ToolCall>,
    /// Base64 images produced by the image tool during the exchange.
    pub images: Vec<String>,
}

pub struct ChatOutcome {
    pub session_id: String,
    pub result: Result<ChatReply, GeminiError>,
}

pub struct TextOutcome {
    pub sector: String,
    pub result: Result<String, GeminiError>,
}

pub fn spawn_chat(config: GeminiConfig, api_key: String, request: ChatRequest) -> Receiver<ChatOutcome> {
    let (sender, receiver) = mpsc::channel();
    thread::spawn(move || {
        let session_id = request.session_id.clone();
        let result = run_chat(&config, &api_key, request);
        let _ = sender.send(ChatOutcome { session_id, result });
    });
    receiver
}

pub fn spawn_briefing(
    config: GeminiConfig,
    api_key: String,
    sector: String,
    simulate: bool,
) -> Receiver<TextOutcome> {
    let (sender, receiver) = mpsc::channel();
    thread::spawn(move || {
        let result = generate_daily_briefing(&config, &api_key, &sector, simulate);
        let _ = sender.send(TextOutcome { sector, result });
    });
    receiver
}

pub fn spawn_report(
    config: GeminiConfig,
    api_key: String,
    sector: String,
    simulate: bool,
) -> Receiver<TextOutcome> {
    let (sender, receiver) = mpsc::channel();
    thread::spawn(move || {
        let result = generate_detailed_report(&config, &api_key, &sector, simulate);
        let _ = sender.send(TextOutcome { sector, result });
    });
    receiver
}

/// Config key first, then the key saved from the settings view, then the
/// `GEMINI_API_KEY` environment variable.
pub fn resolve_api_key(config: &GeminiConfig, stored: Option<&str>) -> String {
    if !config.api_key.trim().is_empty() {
        return config.api_key.trim().to_string();
    }
    if let Some(key) = stored.map(str::trim).filter(|k| !k.is_empty()) {
        return key.to_string();
    }
    std::env::var("GEMINI_API_KEY")
        .map(|k| k.trim().to_string())
        .unwrap_or_default()
}

pub fn build_system_instruction(workspace: &Workspace, now: DateTime<Local>) -> String {
    let json_or_empty = |value: Result<String, serde_json::Error>| value.unwrap_or_else(|_| "[]".to_string());
    let mut instruction = format!(
        "{ASSISTANT_INSTRUCTION}\n\nCURRENT TIME: {now}.\nTASKS: {tasks}.\nEVENTS: {events}.\nNOTES: {notes}",
        now = now.format("%Y-%m-%d %H:%M:%S"),
        tasks = json_or_empty(serde_json::to_string(&workspace.tasks)),
        events = json_or_empty(serde_json::to_string(&workspace.events)),
        notes = json_or_empty(serde_json::to_string(&workspace.notes)),
    );
    if let Some(report) = workspace.detailed_report.as_deref() {
        instruction.push_str(&format!(
            "\n\nCURRENT DEEP MARKET ANALYSIS (sector: {sector}):\n{report}\n\n\
You MUST use this report when answering, build on its conclusions and help put its strategies into practice.",
            sector = workspace.briefing.sector,
        ));
    }
    instruction
}

fn client(config: &GeminiConfig) -> Result<Client, GeminiError> {
    Ok(Client::builder()
        .timeout(Duration::from_secs(config.timeout_seconds.max(5)))
        .build()?)
}

fn ensure_ready(config: &GeminiConfig, api_key: &str) -> Result<(), GeminiError> {
    if !config.enabled {
        return Err(GeminiError::Disabled);
    }
    if api_key.trim().is_empty() {
        return Err(GeminiError::MissingApiKey);
    }
    Ok(())
}

fn run_chat(config: &GeminiConfig, api_key: &str, request: ChatRequest) -> Result<ChatReply, GeminiError> {
    ensure_ready(config, api_key)?;
    let client = client(config)?;
    let model = normalize_model_name(&config.chat_model);

    let mut contents: Vec<Value> = request
        .history
        .iter()
        .map(|message| {
            json!({
                "role": role_name(message.role),
                "parts": [{ "text": message.content }],
            })
        })
        .collect();
    let mut parts = Vec::new();
    if let Some(image) = &request.attachment {
        parts.push(image.to_part());
    }
    parts.push(json!({ "text": request.text }));
    contents.push(json!({ "role": "user", "parts": parts }));

    let mut reply = ChatReply::default();
    for _ in 0..MAX_TOOL_ROUNDS {
        let body = chat_body(&request.system_instruction, &contents);
        let response = generate(&client, api_key, &model, &body)?;
        let candidate = response.candidates.into_iter().next().ok_or(GeminiError::Empty)?;
        let content = candidate.content.unwrap_or_default();
        let calls: Vec<FunctionCall> = content
            .parts
            .iter()
            .filter_map(|part| part.function_call.clone())
            .collect();

        if calls.is_empty() {
            reply.text = joined_text(&content.parts).unwrap_or_else(|| "Done".to_string());
            reply.grounding_metadata = candidate.grounding_metadata;
            return Ok(reply);
        }

        let mut responses = Vec::with_capacity(calls.len());
        for call in &calls {
            handle_function_call(&client, config, api_key, call, &mut reply);
            let mut response = json!({
                "name": call.name,
                "response": { "result": { "success": true } },
            });
            if let (Some(id), Some(obj)) = (&call.id, response.as_object_mut()) {
                obj.insert("id".to_string(), Value::String(id.clone()));
            }
            responses.push(json!({ "functionResponse": response }));
        }
        contents.push(json!({ "role": "model", "parts": content.parts }));
        contents.push(json!({ "role": "user", "parts": responses }));
    }
    Err(GeminiError::ToolLoop)
}

fn handle_function_call(
    client: &Client,
    config: &GeminiConfig,
    api_key: &str,
    call: &FunctionCall,
    reply: &mut ChatReply,
) {
    if call.name == "generateImage" {
        let prompt = arg_str(&call.args, "prompt").unwrap_or_default();
        let aspect = arg_str(&call.args, "aspectRatio");
        match generate_image(client, config, api_key, &prompt, aspect.as_deref(), None) {
            Ok(Some(image)) => reply.images.push(image),
            Ok(None) => tracing::info!("image tool returned no image"),
            Err(err) => tracing::warn!(error = %err, "image tool failed"),
        }
        return;
    }
    match parse_tool_call(&call.name, &call.args) {
        Some(tool) => reply.tool_calls.push(tool),
        None => tracing::warn!(name = %call.name, "ignoring unknown or malformed tool call"),
    }
}

pub fn parse_tool_call(name: &str, args: &Value) -> Option<ToolCall> {
    let priority = || {
        arg_str(args, "priority")
            .and_then(|p| Priority::parse(&p))
            .unwrap_or_default()
    };
    match name {
        "addTask" => Some(ToolCall::AddTask {
            title: arg_str(args, "title")?,
            description: arg_str(args, "description"),
            priority: priority(),
        }),
        "addEvent" => Some(ToolCall::AddEvent {
            title: arg_str(args, "title")?,
            date: arg_str(args, "date")?,
            time: arg_str(args, "time"),
            description: arg_str(args, "description"),
            priority: priority(),
        }),
        "addNote" => Some(ToolCall::AddNote {
            title: arg_str(args, "title")?,
            content: arg_str(args, "content").unwrap_or_default(),
        }),
        _ => None,
    }
}

fn arg_str(args: &Value, key: &str) -> Option<String> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn role_name(role: ChatRole) -> &'static str {
    match role {
        ChatRole::User => "user",
        ChatRole::Model => "model",
    }
}

fn chat_body(system_instruction: &str, contents: &[Value]) -> Value {
    json!({
        "systemInstruction": { "parts": [{ "text": system_instruction }] },
        "contents": contents,
        "tools": [
            { "functionDeclarations": tool_declarations() },
            { "googleSearch": {} }
        ],
    })
}

fn tool_declarations() -> Value {
    json!([
        {
            "name": "addTask",
            "description": "Add a new task to the task list.",
            "parameters": {
                "type": "OBJECT",
                "properties": {
                    "title": { "type": "STRING" },
                    "description": { "type": "STRING" },
                    "priority": { "type": "STRING", "enum": ["low", "medium", "high"] }
                },
                "required": ["title"]
            }
        },
        {
            "name": "addEvent",
            "description": "Add an event to the calendar. Date is YYYY-MM-DD, time is HH:MM.",
            "parameters": {
                "type": "OBJECT",
                "properties": {
                    "title": { "type": "STRING" },
                    "date": { "type": "STRING" },
                    "time": { "type": "STRING" },
                    "description": { "type": "STRING" }
                },
                "required": ["title", "date", "time"]
            }
        },
        {
            "name": "addNote",
            "description": "Create a new text note.",
            "parameters": {
                "type": "OBJECT",
                "properties": {
                    "title": { "type": "STRING" },
                    "content": { "type": "STRING" }
                },
                "required": ["title", "content"]
            }
        },
        {
            "name": "generateImage",
            "description": "Generate an image from a description.",
            "parameters": {
                "type": "OBJECT",
                "properties": {
                    "prompt": { "type": "STRING" },
                    "aspectRatio": { "type": "STRING" }
                },
                "required": ["prompt"]
            }
        }
    ])
}

pub fn simulated_briefing(sector: &str) -> String {
    format!("### Briefing: {sector}\nSimulation mode data.")
}

pub fn simulated_report(sector: &str) -> String {
    format!("# Report: {sector}\nSimulation mode data.")
}

pub fn generate_daily_briefing(
    config: &GeminiConfig,
    api_key: &str,
    sector: &str,
    simulate: bool,
) -> Result<String, GeminiError> {
    if simulate {
        return Ok(simulated_briefing(sector));
    }
    ensure_ready(config, api_key)?;
    let client = client(config)?;
    let body = json!({
        "contents": [{
            "role": "user",
            "parts": [{ "text": format!(
                "Give a short operational overview of the Russian market for the sector \"{sector}\". \
Highlight the 3 most important news items from the last 48 hours."
            ) }]
        }],
        "tools": [{ "googleSearch": {} }],
    });
    let response = generate(&client, api_key, &normalize_model_name(&config.briefing_model), &body)?;
    Ok(response.text().unwrap_or_else(|| "No data.".to_string()))
}

pub fn generate_detailed_report(
    config: &GeminiConfig,
    api_key: &str,
    sector: &str,
    simulate: bool,
) -> Result<String, GeminiError> {
    if simulate {
        return Ok(simulated_report(sector));
    }
    ensure_ready(config, api_key)?;
    let client = client(config)?;
    let body = json!({
        "systemInstruction": { "parts": [{ "text": REPORT_INSTRUCTION }] },
        "contents": [{
            "role": "user",
            "parts": [{ "text": format!(
                "Produce the most comprehensive and detailed strategic report for the sector \"{sector}\" \
following your instructions (12 sections)."
            ) }]
        }],
        "tools": [{ "googleSearch": {} }],
        "generationConfig": {
            "thinkingConfig": { "thinkingBudget": REPORT_THINKING_BUDGET }
        },
    });
    let response = generate(&client, api_key, &normalize_model_name(&config.report_model), &body)?;
    Ok(response
        .text()
        .unwrap_or_else(|| "Could not build the report. Try again later.".to_string()))
}

/// Returns the first inline image of the reply as base64, if any.
pub fn generate_image(
    client: &Client,
    config: &GeminiConfig,
    api_key: &str,
    prompt: &str,
    aspect_ratio: Option<&str>,
    source: Option<&InlineImage>,
) -> Result<Option<String>, GeminiError> {
    ensure_ready(config, api_key)?;
    let mut parts = Vec::new();
    if let Some(image) = source {
        parts.push(image.to_part());
    }
    parts.push(json!({ "text": prompt }));
    let body = json!({
        "contents": [{ "role": "user", "parts": parts }],
        "generationConfig": {
            "imageConfig": { "aspectRatio": aspect_ratio.unwrap_or(DEFAULT_ASPECT_RATIO) }
        },
    });
    let response = generate(client, api_key, &normalize_model_name(&config.image_model), &body)?;
    Ok(response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .and_then(|content| content.parts.into_iter().find_map(|p| p.inline_data))
        .map(|data| data.data))
}

pub fn generate_image_standalone(
    config: &GeminiConfig,
    api_key: &str,
    prompt: &str,
    source: Option<&InlineImage>,
) -> Result<Option<String>, GeminiError> {
    let client = client(config)?;
    generate_image(&client, config, api_key, prompt, None, source)
}

fn generate(
    client: &Client,
    api_key: &str,
    model: &str,
    body: &Value,
) -> Result<GeminiResponse, GeminiError> {
    let url = format!("{API_BASE}/{model}:generateContent");
    let response = client
        .post(url)
        .header("x-goog-api-key", api_key)
        .json(body)
        .send()?;
    let status = response.status();
    let body_text = response.text()?;
    if !status.is_success() {
        return Err(GeminiError::Api {
            status: status.as_u16(),
            message: api_error_message(&body_text),
        });
    }
    parse_response(&body_text)
}

fn parse_response(body: &str) -> Result<GeminiResponse, GeminiError> {
    serde_json::from_str(body).map_err(|e| GeminiError::Decode(e.to_string()))
}

fn api_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.pointer("/error/message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.trim().chars().take(240).collect())
}

fn joined_text(parts: &[GeminiPart]) -> Option<String> {
    let text: String = parts
        .iter()
        .filter(|p| !p.thought.unwrap_or(false))
        .filter_map(|p| p.text.as_deref())
        .collect();
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn normalize_model_name(model: &str) -> String {
    let trimmed = model.trim();
    let stripped = trimmed.strip_prefix("models/").unwrap_or(trimmed);
    match stripped {
        "gemini-3-flash" => "gemini-3-flash-preview".to_string(),
        "gemini-3-pro" => "gemini-3-pro-preview".to_string(),
        other => other.to_string(),
    }
}

#[derive(Deserialize, Default)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

impl GeminiResponse {
    fn text(&self) -> Option<String> {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .and_then(|content| joined_text(&content.parts))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    grounding_metadata: Option<Value>,
}

#[derive(Deserialize, Default)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

/// Kept close to the wire shape so model turns can be echoed back verbatim.
#[derive(Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
struct GeminiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    thought: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_call: Option<FunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

#[derive(Deserialize, Serialize, Clone)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
}

#[derive(Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    #[serde(default)]
    mime_type: String,
    data: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tool_calls_with_defaults() {
        let task = parse_tool_call("addTask", &json!({"title": "Call bank"}));
        assert_eq!(
            task,
            Some(ToolCall::AddTask {
                title: "Call bank".to_string(),
                description: None,
                priority: Priority::Medium,
            })
        );

        let event = parse_tool_call(
            "addEvent",
            &json!({"title": "Demo", "date": "2025-04-01", "time": "15:30", "priority": "high"}),
        );
        assert!(matches!(
            event,
            Some(ToolCall::AddEvent { ref time, priority: Priority::High, .. }) if time.as_deref() == Some("15:30")
        ));

        assert_eq!(parse_tool_call("addTask", &json!({"title": "  "})), None);
        assert_eq!(parse_tool_call("proposeSystemStructure", &json!({})), None);
    }

    #[test]
    fn system_instruction_embeds_workspace_and_report() {
        let mut ws = Workspace::default();
        ws.add_note("Supplier list", "A, B");
        let plain = build_system_instruction(&ws, Local::now());
        assert!(plain.contains("Supplier list"));
        assert!(!plain.contains("DEEP MARKET ANALYSIS"));

        ws.set_briefing("Retail", "news".to_string());
        ws.set_detailed_report(Some("Margins are shrinking".to_string()));
        let with_report = build_system_instruction(&ws, Local::now());
        assert!(with_report.contains("sector: Retail"));
        assert!(with_report.contains("Margins are shrinking"));
    }

    #[test]
    fn chat_body_declares_tools_and_search() {
        let body = chat_body("sys", &[json!({"role": "user", "parts": [{"text": "hi"}]})]);
        let names: Vec<&str> = body["tools"][0]["functionDeclarations"]
            .as_array()
            .map(|decls| decls.iter().filter_map(|d| d["name"].as_str()).collect())
            .unwrap_or_default();
        assert_eq!(names, vec!["addTask", "addEvent", "addNote", "generateImage"]);
        assert!(body["tools"][1].get("googleSearch").is_some());
    }

    #[test]
    fn response_parts_keep_unknown_fields_for_echo() {
        let raw = r#"{"candidates":[{"content":{"parts":[
            {"functionCall":{"name":"addNote","args":{"title":"T","content":"C"}},"thoughtSignature":"sig"}
        ]},"groundingMetadata":{"webSearchQueries":["q"]}}]}"#;
        let response = parse_response(raw).expect("parse");
        let part = &response.candidates[0].content.as_ref().expect("content").parts[0];
        let echoed = serde_json::to_value(part).expect("serialize");
        assert_eq!(echoed["thoughtSignature"], json!("sig"));
        assert_eq!(echoed["functionCall"]["name"], json!("addNote"));
        assert!(response.candidates[0].grounding_metadata.is_some());
    }

    #[test]
    fn text_skips_thought_parts() {
        let raw = r#"{"candidates":[{"content":{"parts":[
            {"text":"thinking...","thought":true},{"text":"Answer"}
        ]}}]}"#;
        assert_eq!(parse_response(raw).expect("parse").text().as_deref(), Some("Answer"));
    }

    #[test]
    fn simulation_needs_no_key_or_network() {
        let config = GeminiConfig::default();
        let briefing = generate_daily_briefing(&config, "", "Logistics", true).expect("briefing");
        assert!(briefing.contains("Logistics"));
        let report = generate_detailed_report(&config, "", "Logistics", true).expect("report");
        assert!(report.starts_with("# Report: Logistics"));
        assert!(matches!(
            generate_daily_briefing(&config, "", "Logistics", false),
            Err(GeminiError::MissingApiKey)
        ));
    }

    #[test]
    fn api_key_precedence() {
        let mut config = GeminiConfig::default();
        config.api_key = " from-config ".to_string();
        assert_eq!(resolve_api_key(&config, Some("stored")), "from-config");
        config.api_key.clear();
        assert_eq!(resolve_api_key(&config, Some(" stored ")), "stored");
    }

    #[test]
    fn model_names_are_normalized() {
        assert_eq!(normalize_model_name("models/gemini-3-flash"), "gemini-3-flash-preview");
        assert_eq!(normalize_model_name("gemini-2.5-flash-image"), "gemini-2.5-flash-image");
    }
}
