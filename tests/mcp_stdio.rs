use std::path::{Path, PathBuf};

use kbseek::{EntryDraft, KnowledgeBase};
use rmcp::{
    ServiceExt,
    model::CallToolRequestParams,
    transport::{ConfigureCommandExt, TokioChildProcess},
};
use serde_json::json;

fn setup_fixture(data_dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let tantivy_dir = data_dir.join("tantivy");
    std::fs::create_dir_all(&tantivy_dir)?;
    let kb = KnowledgeBase::open(&data_dir.join("entries.redb"), &tantivy_dir)?;
    kb.add_many(vec![
        EntryDraft::new("Reset password", "Locked out of my account", "Use the reset link", 1),
        EntryDraft::new("Billing invoice", "Where is my invoice", "Open the billing tab", 2),
        EntryDraft::new("Password reset steps", "Steps", "Settings, then security", 1),
    ])?;
    Ok(())
}

fn call(name: &str, args: serde_json::Value) -> CallToolRequestParams {
    let mut params = CallToolRequestParams::new(name.to_string());
    params.arguments = args.as_object().cloned();
    params
}

#[tokio::test]
async fn mcp_stdio_search_roundtrip() -> Result<(), Box<dyn std::error::Error>>
{
    let tempdir = tempfile::tempdir()?;
    setup_fixture(tempdir.path())?;

    let bin = kbseek_bin()?;
    let transport = TokioChildProcess::new(
        tokio::process::Command::new(bin).configure(|cmd| {
            cmd.arg("mcp")
                .env("KBSEEK_DATA_DIR", tempdir.path())
                .env("KBSEEK_ENCODER", "hashing");
        }),
    )?;

    let client = ().serve(transport).await?;

    let result = client
        .peer()
        .call_tool(call("kb_search", json!({ "phrase": "invoice", "limit": 5 })))
        .await?;
    let structured = result.structured_content.expect("structured content");
    assert_eq!(structured["stage"], "full_text");
    let results = structured["results"].as_array().expect("results array");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["entry"]["id"].as_u64(), Some(2));

    let result = client
        .peer()
        .call_tool(call(
            "kb_search",
            json!({ "phrase": "how do I reset my password", "limit": 2 }),
        ))
        .await?;
    let structured = result.structured_content.expect("structured content");
    assert_eq!(structured["stage"], "semantic");
    let mut ids: Vec<u64> = structured["results"]
        .as_array()
        .expect("results array")
        .iter()
        .filter_map(|hit| hit["entry"]["id"].as_u64())
        .collect();
    ids.sort();
    assert_eq!(ids, vec![1, 3]);

    let get_result = client
        .peer()
        .call_tool(call("kb_get", json!({ "id": 3 })))
        .await?;
    let text = get_result
        .content
        .first()
        .and_then(|c| c.as_text())
        .map(|t| t.text.clone())
        .unwrap_or_default();
    assert!(text.starts_with("#3 Password reset steps"));

    let blank = client
        .peer()
        .call_tool(call("kb_search", json!({ "phrase": " " })))
        .await;
    assert!(blank.is_err());

    client.cancel().await?;
    Ok(())
}

fn kbseek_bin() -> Result<PathBuf, Box<dyn std::error::Error>> {
    if let Some(bin) = option_env!("CARGO_BIN_EXE_kbseek") {
        return Ok(PathBuf::from(bin));
    }

    let mut path = std::env::current_exe()?;
    path.pop();
    if path.ends_with("deps") {
        path.pop();
    }
    path.push("kbseek");

    if cfg!(windows) {
        path.set_extension("exe");
    }

    Ok(path)
}
