//! 编排集成测试：端到端任务、检查点恢复、重试上限

use std::sync::Arc;

use async_trait::async_trait;
use nabd::agent::{create_components_with, process_request, RunRequest};
use nabd::checkpoint::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
use nabd::config::{AppConfig, OrchestratorSection};
use nabd::core::{AgentError, Controller, Node};
use nabd::llm::{LlmError, MockLlmClient, ScriptedReply};
use nabd::observability::NoopMetrics;
use nabd::pipeline::{ModePolicies, RunEvent};
use nabd::tools::{FileWriterTool, Tool, ToolExecutor, ToolOutput, ToolRegistry};
use serde_json::Value;

/// 固定返回人口数据的搜索工具
struct FakeSearch;

#[async_trait]
impl Tool for FakeSearch {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web. Params: {\"query\": \"...\"}"
    }

    async fn invoke(&self, params: Value) -> ToolOutput {
        let q = params.get("query").and_then(|v| v.as_str()).unwrap_or("");
        ToolOutput::ok(format!(
            "Results for '{q}': Japan population is about 124.5 million (2024 estimate)."
        ))
    }
}

fn registry(data_dir: &std::path::Path) -> ToolRegistry {
    let mut reg = ToolRegistry::new();
    reg.register(FakeSearch);
    reg.register(FileWriterTool::new(data_dir));
    reg
}

fn controller(
    llm: Arc<MockLlmClient>,
    data_dir: &std::path::Path,
    store: Arc<dyn CheckpointStore>,
) -> Controller {
    Controller::new(
        llm,
        Arc::new(ToolExecutor::new(registry(data_dir), 5)),
        Arc::new(ModePolicies::default()),
        store,
        &OrchestratorSection::default(),
    )
}

const PLAN: &str = "```json\n{\"plan\": [\"search for the population of Japan\", \"save the population to a file\"]}\n```";
const SELECT_SEARCH: &str =
    "{\"tool\": \"web_search\", \"params\": {\"query\": \"population of Japan\"}}";
const SELECT_WRITE: &str = "I'll save it now.\n{\"tool\": \"file_writer\", \"params\": {\"filename\": \"japan_population.txt\", \"content\": \"Japan population: about 124.5 million (2024)\"}}";
const ADVANCE: &str = "{\"decision\": \"advance\", \"feedback\": \"population found\"}";
const COMPLETE: &str = "{\"decision\": \"complete\", \"feedback\": \"file saved\"}";
const REPORT: &str =
    "Japan has about 124.5 million people. The figure was saved to japan_population.txt.";

#[tokio::test]
async fn test_population_of_japan_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let data_dir = dir.path().join("data");
    let llm = Arc::new(MockLlmClient::scripted([
        PLAN,
        SELECT_SEARCH,
        ADVANCE,
        SELECT_WRITE,
        COMPLETE,
        REPORT,
    ]));
    let store = Arc::new(MemoryCheckpointStore::new());
    let components = create_components_with(
        AppConfig::default(),
        llm.clone(),
        registry(&data_dir),
        store.clone(),
        Arc::new(NoopMetrics),
    );

    let req = RunRequest {
        prompt: "find the population of Japan and save it to a file".into(),
        thread_id: Some("japan".into()),
        mode: Some("researcher".into()),
        image_ref: None,
    };
    let resp = process_request(&components, "japan", &req).await.unwrap();

    assert!(resp.success);
    assert_eq!(resp.plan.len(), 2);
    assert_eq!(resp.steps_executed, 2);
    assert!(resp.result.contains("japan_population.txt"));
    assert_eq!(llm.call_count(), 6);

    let written = std::fs::read_to_string(data_dir.join("japan_population.txt")).unwrap();
    assert!(written.contains("124.5 million"));

    let cp = store.load("japan").await.unwrap().unwrap();
    assert_eq!(cp.last_node, Node::Writing);
    assert!(cp.state.is_complete);
    let records = cp.state.records_in_order();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].step_id, "step-1#1");
    assert_eq!(records[0].tool_name, "web_search");
    assert!(records[0].success && !records[0].result_text.is_empty());
    assert_eq!(records[1].step_id, "step-2#1");
    assert_eq!(records[1].tool_name, "file_writer");
    assert_eq!(records[1].result_text, "File saved to data/japan_population.txt");

    // 汇报节点能看到写文件的结果
    let writer_prompt = llm.prompt_of(5).unwrap();
    assert!(writer_prompt.contains("File saved to data/japan_population.txt"));

    // 已完成的运行不会被恢复：同一会话的新请求重新规划
    assert!(components.controller.pending_run("japan").await.is_none());
}

#[tokio::test]
async fn test_resume_after_restart_continues_at_reviewing() {
    let dir = tempfile::tempdir().unwrap();
    let data_dir = dir.path().join("data");
    let cp_dir = dir.path().join("checkpoints");

    // 第一个进程：执行完第 1 步后 oracle 断开
    let first = Arc::new(MockLlmClient::scripted([PLAN, SELECT_SEARCH]));
    first.push_reply(ScriptedReply::Fail(LlmError::Network("connection reset".into())));
    let c1 = controller(first, &data_dir, Arc::new(FileCheckpointStore::new(&cp_dir)));
    let err = c1
        .run("t-42", "find the population of Japan and save it to a file", "general", &[], None)
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::OracleUnreachable(LlmError::Network(_))));
    drop(c1);

    // 模拟重启：新的存储实例从同一目录加载
    let store = Arc::new(FileCheckpointStore::new(&cp_dir));
    let cp = store.load("t-42").await.unwrap().unwrap();
    assert_eq!(cp.last_node, Node::Executing);
    assert_eq!(cp.state.current_step_index, 0);
    assert_eq!(cp.state.tools_output.len(), 1);

    let second = Arc::new(MockLlmClient::scripted([
        ADVANCE,
        SELECT_WRITE,
        COMPLETE,
        REPORT,
    ]));
    let c2 = controller(second.clone(), &data_dir, store);
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let out = c2
        .run("t-42", "ignored on resume", "general", &[], Some(&tx))
        .await
        .unwrap();
    drop(tx);

    assert!(out.resumed);
    assert_eq!(out.execute_cycles, 1);
    assert_eq!(out.state.plan, cp.state.plan);
    assert_eq!(out.state.steps_executed(), 2);
    assert_eq!(out.report, REPORT);
    // 恢复后的第一次 oracle 调用是复审而不是规划
    let first_prompt = second.prompt_of(0).unwrap();
    assert!(first_prompt.contains("Review the execution progress"));
    assert!(!first_prompt.contains("You are the planner"));

    let first_event = rx.recv().await.unwrap();
    assert_eq!(
        first_event,
        RunEvent::Resumed {
            last_node: Node::Executing,
            next: Node::Reviewing,
        }
    );
    let mut planned = false;
    while let Some(ev) = rx.recv().await {
        planned |= matches!(ev, RunEvent::Planned { .. });
    }
    assert!(!planned);
}

#[tokio::test]
async fn test_endless_retry_is_bounded_by_cap() {
    let dir = tempfile::tempdir().unwrap();
    // 计划之后的每次 oracle 调用都要求 retry
    let llm = Arc::new(
        MockLlmClient::scripted(["{\"plan\": [\"step one\", \"step two\"]}"])
            .with_fallback("{\"decision\": \"retry\", \"feedback\": \"try again\"}"),
    );
    let c = controller(llm, dir.path(), Arc::new(MemoryCheckpointStore::new()));
    let out = c.run("r", "loop forever", "general", &[], None).await.unwrap();

    let cap = OrchestratorSection::default().max_retries_per_step as usize;
    assert_eq!(out.execute_cycles, 2 * (cap + 1));
    assert!(out.state.is_complete);
    assert_eq!(out.state.steps_executed(), 2);
    let ids: Vec<&str> = out
        .state
        .records_in_order()
        .iter()
        .map(|r| r.step_id.as_str())
        .collect();
    assert_eq!(
        ids,
        vec!["step-1#1", "step-1#2", "step-1#3", "step-2#1", "step-2#2", "step-2#3"]
    );
    assert!(!out.report.is_empty());
}

#[tokio::test]
async fn test_second_request_on_thread_sees_history() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(MockLlmClient::scripted([
        "{\"plan\": [], \"direct_answer\": true}",
        "Hello!",
        "{\"plan\": [], \"direct_answer\": true}",
        "You said hi before.",
    ]));
    let components = create_components_with(
        AppConfig::default(),
        llm.clone(),
        registry(dir.path()),
        Arc::new(MemoryCheckpointStore::new()),
        Arc::new(NoopMetrics),
    );
    process_request(&components, "chat", &RunRequest::new("hi"))
        .await
        .unwrap();
    let resp = process_request(&components, "chat", &RunRequest::new("what did I say?"))
        .await
        .unwrap();
    assert_eq!(resp.result, "You said hi before.");
    // 第二次规划的上下文里带有上一轮对话
    let planner_prompt = llm.prompt_of(2).unwrap();
    assert!(planner_prompt.contains("Hello!"));
    assert_eq!(components.sessions.history("chat").await.unwrap().len(), 4);
}

/// 执行一秒的搜索工具
struct SlowSearch;

#[async_trait]
impl Tool for SlowSearch {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web slowly."
    }

    async fn invoke(&self, _params: Value) -> ToolOutput {
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        ToolOutput::ok("slow result")
    }
}

#[tokio::test]
async fn test_history_is_readable_during_a_run() {
    let mut reg = ToolRegistry::new();
    reg.register(SlowSearch);
    let llm = Arc::new(MockLlmClient::scripted([
        "{\"plan\": [\"look it up\"]}",
        "{\"tool\": \"web_search\", \"params\": {\"query\": \"anything\"}}",
        COMPLETE,
        "Looked it up.",
    ]));
    let components = Arc::new(create_components_with(
        AppConfig::default(),
        llm,
        reg,
        Arc::new(MemoryCheckpointStore::new()),
        Arc::new(NoopMetrics),
    ));

    let running = Arc::clone(&components);
    let task = tokio::spawn(async move {
        process_request(&running, "busy", &RunRequest::new("look something up")).await
    });
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;

    let history = tokio::time::timeout(
        std::time::Duration::from_millis(200),
        components.sessions.history("busy"),
    )
    .await
    .expect("history read must not wait for the run")
    .unwrap();
    assert_eq!(history.len(), 1);

    let resp = task.await.unwrap().unwrap();
    assert_eq!(resp.result, "Looked it up.");
    assert_eq!(components.sessions.history("busy").await.unwrap().len(), 2);
}
