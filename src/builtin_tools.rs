//! Concrete built-in tool handlers: the closed advanced-tool set plus `generateImage` and
//! `searchDuckDuckGo`. `fetchWebpage` and the memory pair wrap `tools::http_client`/
//! `tools::memory`. Every other advanced tool is an [`LlmBackedTool`] — a one-shot completion
//! with a narrow instruction, rather than a third-party integration.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::dispatcher::StreamDispatcher;
use crate::image_generation::{ImageGenerationClient, ImageGenerationOptions};
use crate::message::ToolDefinition;
use crate::tool_registry::{LlmBackedTool, ToolHandler};
use crate::tools::{HttpClient, Memory};

fn require_str<'a>(args: &'a Value, field: &str) -> Result<&'a str, String> {
    args.get(field)
        .and_then(|v| v.as_str())
        .ok_or_else(|| format!("missing required field '{}'", field))
}

/// `generateImage`: invokes the configured image-generation collaborator and returns only
/// `{success:true}` to the model — the actual data-URI goes through the per-request side channel,
/// never back through the context window.
pub struct GenerateImageTool {
    client: Option<Arc<dyn ImageGenerationClient>>,
}

impl GenerateImageTool {
    pub fn new(client: Option<Arc<dyn ImageGenerationClient>>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ToolHandler for GenerateImageTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "generateImage".to_string(),
            description: "Generates an image from a text prompt and returns it to the caller out of band.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "prompt": {"type": "string", "description": "Description of the image to generate"},
                    "aspect_ratio": {"type": "string", "description": "Optional aspect ratio, e.g. '16:9'"},
                },
                "required": ["prompt"],
            }),
        }
    }

    async fn call(&self, arguments: Value) -> Result<Value, String> {
        let prompt = require_str(&arguments, "prompt")?;
        let client = self.client.as_ref().ok_or_else(|| "image generation is not configured".to_string())?;
        let options = ImageGenerationOptions {
            aspect_ratio: arguments.get("aspect_ratio").and_then(|v| v.as_str()).map(|s| s.to_string()),
            num_images: Some(1),
            response_format: Some("b64_json".to_string()),
        };
        let response = client.generate_image(prompt, options).await.map_err(|e| e.to_string())?;
        let image = response.images.into_iter().next().ok_or_else(|| "provider returned no images".to_string())?;
        let data_uri = image
            .b64_json
            .or(image.url)
            .ok_or_else(|| "provider returned neither a URL nor inline image data".to_string())?;
        Ok(json!({ "data_uri": data_uri }))
    }
}

/// `searchDuckDuckGo`: queries DuckDuckGo's HTML-only endpoint (no API key required) and
/// extracts result titles/links/snippets. Built directly on `reqwest` rather than the full
/// [`HttpClient`] builder since it needs no domain allowlisting of its own — the endpoint is
/// fixed.
pub struct SearchDuckDuckGoTool {
    client: reqwest::Client,
}

impl Default for SearchDuckDuckGoTool {
    fn default() -> Self {
        Self { client: reqwest::Client::new() }
    }
}

#[async_trait]
impl ToolHandler for SearchDuckDuckGoTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "searchDuckDuckGo".to_string(),
            description: "Searches the web via DuckDuckGo and returns the top results.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "Search query"},
                    "max_results": {"type": "integer", "description": "Maximum number of results to return", "default": 5},
                },
                "required": ["query"],
            }),
        }
    }

    async fn call(&self, arguments: Value) -> Result<Value, String> {
        let query = require_str(&arguments, "query")?;
        let max_results = arguments.get("max_results").and_then(|v| v.as_u64()).unwrap_or(5) as usize;

        let response = self
            .client
            .get("https://html.duckduckgo.com/html/")
            .query(&[("q", query)])
            .header("User-Agent", "Mozilla/5.0 (compatible; agentrelay/0.1)")
            .send()
            .await
            .map_err(|e| format!("search request failed: {}", e))?;
        let body = response.text().await.map_err(|e| format!("failed to read search response: {}", e))?;

        let results = parse_ddg_results(&body, max_results);
        Ok(json!({ "results": results }))
    }
}

/// Extracts `{title, url, snippet}` triples from DuckDuckGo's server-rendered HTML result page.
/// A hand-rolled scan rather than a full HTML parser: the markup is stable and narrow enough
/// (`result__a` anchors, `result__snippet` spans) that a linear scan suffices.
fn parse_ddg_results(html: &str, max_results: usize) -> Vec<Value> {
    let mut results = Vec::new();
    let mut cursor = 0;
    while results.len() < max_results {
        let Some(anchor_start) = html[cursor..].find("result__a\"") else { break };
        let abs_start = cursor + anchor_start;
        let Some(href_start) = html[..abs_start].rfind("href=\"") else {
            cursor = abs_start + 1;
            continue;
        };
        let href_start = href_start + "href=\"".len();
        let Some(href_end) = html[href_start..].find('"') else { break };
        let url = html[href_start..href_start + href_end].to_string();

        let Some(tag_close) = html[abs_start..].find('>') else { break };
        let title_start = abs_start + tag_close + 1;
        let Some(title_end_rel) = html[title_start..].find("</a>") else { break };
        let title = strip_tags(&html[title_start..title_start + title_end_rel]);

        let snippet = html[title_start + title_end_rel..]
            .find("result__snippet")
            .and_then(|snippet_marker| {
                let snippet_region_start = title_start + title_end_rel + snippet_marker;
                let tag_close = html[snippet_region_start..].find('>')?;
                let content_start = snippet_region_start + tag_close + 1;
                let content_end = html[content_start..].find("</a>").or_else(|| html[content_start..].find("</span>"))?;
                Some(strip_tags(&html[content_start..content_start + content_end]))
            })
            .unwrap_or_default();

        results.push(json!({ "title": title, "url": url, "snippet": snippet }));
        cursor = title_start + title_end_rel;
    }
    results
}

fn strip_tags(fragment: &str) -> String {
    let mut out = String::new();
    let mut in_tag = false;
    for c in fragment.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.trim().to_string()
}

/// `fetchWebpage`: a thin wrapper over [`HttpClient::get`], truncating the body to a sane size
/// before it re-enters the model context.
pub struct FetchWebpageTool {
    client: HttpClient,
}

impl Default for FetchWebpageTool {
    fn default() -> Self {
        Self { client: HttpClient::new() }
    }
}

const MAX_FETCHED_BODY_CHARS: usize = 20_000;

#[async_trait]
impl ToolHandler for FetchWebpageTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "fetchWebpage".to_string(),
            description: "Fetches a webpage by URL and returns its status and truncated body.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": { "url": {"type": "string"} },
                "required": ["url"],
            }),
        }
    }

    async fn call(&self, arguments: Value) -> Result<Value, String> {
        let url = require_str(&arguments, "url")?;
        let response = self.client.get(url).await.map_err(|e| e.to_string())?;
        let mut body = response.body;
        if body.len() > MAX_FETCHED_BODY_CHARS {
            body.truncate(MAX_FETCHED_BODY_CHARS);
        }
        Ok(json!({ "status": response.status, "body": body }))
    }
}

/// `memorySave` / `memoryRetrieve`: a shared [`Memory`] instance scoped to the process — an
/// agent-facing scratchpad, distinct from the Collaborator Interface's long-term per-user memory.
pub struct MemorySaveTool {
    memory: Arc<Memory>,
}

impl MemorySaveTool {
    pub fn new(memory: Arc<Memory>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl ToolHandler for MemorySaveTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "memorySave".to_string(),
            description: "Saves a value under a key in the agent's scratchpad memory.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "key": {"type": "string"},
                    "value": {"type": "string"},
                    "ttl_seconds": {"type": "integer"},
                },
                "required": ["key", "value"],
            }),
        }
    }

    async fn call(&self, arguments: Value) -> Result<Value, String> {
        let key = require_str(&arguments, "key")?.to_string();
        let value = require_str(&arguments, "value")?.to_string();
        let ttl = arguments.get("ttl_seconds").and_then(|v| v.as_u64());
        self.memory.put(key, value, ttl);
        Ok(json!({ "saved": true }))
    }
}

pub struct MemoryRetrieveTool {
    memory: Arc<Memory>,
}

impl MemoryRetrieveTool {
    pub fn new(memory: Arc<Memory>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl ToolHandler for MemoryRetrieveTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "memoryRetrieve".to_string(),
            description: "Retrieves a previously saved value from the agent's scratchpad memory.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": { "key": {"type": "string"} },
                "required": ["key"],
            }),
        }
    }

    async fn call(&self, arguments: Value) -> Result<Value, String> {
        let key = require_str(&arguments, "key")?;
        match self.memory.get(key, false) {
            Some((value, _)) => Ok(json!({ "found": true, "value": value })),
            None => Ok(json!({ "found": false })),
        }
    }
}

fn text_arg(args: &Value) -> Result<String, String> {
    Ok(require_str(args, "text")?.to_string())
}

/// Builds the full set of advanced, LLM-backed tools plus `fetchWebpage` and the two memory
/// tools, sharing one `dispatcher`/`model` pair for every one-shot completion. `memory` is a
/// process-lifetime scratchpad shared across requests rather than a per-request store.
pub fn advanced_tools(dispatcher: Arc<StreamDispatcher>, model: String, memory: Arc<Memory>) -> Vec<Arc<dyn ToolHandler>> {
    let llm = |name: &'static str, description: &'static str, parameters: Value, template: fn(&Value) -> Result<String, String>| {
        Arc::new(LlmBackedTool::new(name, description, parameters, model.clone(), template, dispatcher.clone())) as Arc<dyn ToolHandler>
    };

    vec![
        Arc::new(FetchWebpageTool::default()),
        llm(
            "analyzeText",
            "Analyzes a block of text and reports its key themes, tone, and structure.",
            json!({"type": "object", "properties": {"text": {"type": "string"}}, "required": ["text"]}),
            |args| Ok(format!("Analyze the following text for key themes, tone, and structure:\n\n{}", text_arg(args)?)),
        ),
        llm(
            "convertContentFormat",
            "Converts text between formats, e.g. markdown to plain text or prose to a bullet list.",
            json!({
                "type": "object",
                "properties": {"text": {"type": "string"}, "target_format": {"type": "string"}},
                "required": ["text", "target_format"],
            }),
            |args| {
                let text = text_arg(args)?;
                let target = require_str(args, "target_format")?;
                Ok(format!("Convert the following content to {}:\n\n{}", target, text))
            },
        ),
        llm(
            "summarizeText",
            "Produces a concise summary of a block of text.",
            json!({"type": "object", "properties": {"text": {"type": "string"}}, "required": ["text"]}),
            |args| Ok(format!("Summarize the following text concisely:\n\n{}", text_arg(args)?)),
        ),
        llm(
            "translateText",
            "Translates text into a target language.",
            json!({
                "type": "object",
                "properties": {"text": {"type": "string"}, "target_language": {"type": "string"}},
                "required": ["text", "target_language"],
            }),
            |args| {
                let text = text_arg(args)?;
                let target = require_str(args, "target_language")?;
                Ok(format!("Translate the following text into {}:\n\n{}", target, text))
            },
        ),
        llm(
            "generateStructuredData",
            "Produces structured (JSON) data from a natural-language description.",
            json!({
                "type": "object",
                "properties": {"description": {"type": "string"}, "schema": {"type": "object"}},
                "required": ["description"],
            }),
            |args| {
                let description = require_str(args, "description")?;
                let schema = args.get("schema").cloned().unwrap_or(json!({}));
                Ok(format!(
                    "Produce a JSON object matching this schema: {}\n\nDescription: {}",
                    schema, description
                ))
            },
        ),
        llm(
            "answerFromData",
            "Answers a question using only the supplied data.",
            json!({
                "type": "object",
                "properties": {"question": {"type": "string"}, "data": {"type": "string"}},
                "required": ["question", "data"],
            }),
            |args| {
                let question = require_str(args, "question")?;
                let data = require_str(args, "data")?;
                Ok(format!("Using only this data:\n\n{}\n\nAnswer: {}", data, question))
            },
        ),
        llm(
            "datePlan",
            "Builds a day-by-day plan for a trip or event given a date range and constraints.",
            json!({
                "type": "object",
                "properties": {"start_date": {"type": "string"}, "end_date": {"type": "string"}, "goal": {"type": "string"}},
                "required": ["start_date", "end_date", "goal"],
            }),
            |args| {
                let start = require_str(args, "start_date")?;
                let end = require_str(args, "end_date")?;
                let goal = require_str(args, "goal")?;
                Ok(format!("Build a day-by-day plan from {} to {} for: {}", start, end, goal))
            },
        ),
        llm(
            "integrateInformation",
            "Synthesizes a single coherent answer from several pieces of information.",
            json!({
                "type": "object",
                "properties": {"pieces": {"type": "array", "items": {"type": "string"}}},
                "required": ["pieces"],
            }),
            |args| {
                let pieces = args
                    .get("pieces")
                    .and_then(|v| v.as_array())
                    .ok_or_else(|| "missing required field 'pieces'".to_string())?;
                let joined = pieces.iter().filter_map(|p| p.as_str()).collect::<Vec<_>>().join("\n---\n");
                Ok(format!("Integrate the following pieces of information into one coherent answer:\n\n{}", joined))
            },
        ),
        llm(
            "generateCode",
            "Generates a code snippet satisfying a natural-language description.",
            json!({
                "type": "object",
                "properties": {"description": {"type": "string"}, "language": {"type": "string"}},
                "required": ["description"],
            }),
            |args| {
                let description = require_str(args, "description")?;
                let language = args.get("language").and_then(|v| v.as_str()).unwrap_or("the most suitable language");
                Ok(format!("Write code in {} that: {}", language, description))
            },
        ),
        llm(
            "evaluateAgentPerformance",
            "Critiques a transcript of an agent's reasoning and tool use.",
            json!({
                "type": "object",
                "properties": {"transcript": {"type": "string"}},
                "required": ["transcript"],
            }),
            |args| Ok(format!("Evaluate this agent transcript for correctness and efficiency:\n\n{}", text_arg(args)?)),
        ),
        Arc::new(MemorySaveTool::new(memory.clone())),
        Arc::new(MemoryRetrieveTool::new(memory)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_ddg_results_extracts_title_url_and_snippet() {
        let html = r#"
            <a class="result__a" href="https://example.com/cats">All About Cats</a>
            <a class="result__snippet" href="https://example.com/cats">Cats are great pets.</a>
        "#;
        let results = parse_ddg_results(html, 5);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0]["title"], "All About Cats");
        assert_eq!(results[0]["url"], "https://example.com/cats");
    }

    #[test]
    fn parse_ddg_results_respects_max_results() {
        let html = r#"
            <a class="result__a" href="https://a.com">A</a>
            <a class="result__a" href="https://b.com">B</a>
            <a class="result__a" href="https://c.com">C</a>
        "#;
        let results = parse_ddg_results(html, 2);
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn generate_image_without_a_configured_client_is_an_error() {
        let tool = GenerateImageTool::new(None);
        let result = tool.call(json!({"prompt": "a cat"})).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn memory_save_then_retrieve_round_trips() {
        let memory = Arc::new(Memory::new());
        let save = MemorySaveTool::new(memory.clone());
        let retrieve = MemoryRetrieveTool::new(memory);
        save.call(json!({"key": "k", "value": "v"})).await.unwrap();
        let result = retrieve.call(json!({"key": "k"})).await.unwrap();
        assert_eq!(result["found"], true);
        assert_eq!(result["value"], "v");
    }
}
