use super::ChatTurn;

/// Language used when a request does not name one.
pub const DEFAULT_LANGUAGE: &str = "en";

/// Output contract sent to every backend, ahead of the conversation.
///
/// Responses are classified by [`super::resolve`] against exactly these
/// shapes, so the text must not vary between requests.
pub const PROTOCOL_INSTRUCTIONS: &str = r#"You are a helpful assistant that answers in exactly one of five formats.

1. Plain text: for explanations, conversation and lists, answer in plain text or markdown.

2. Table: when the user asks for tabular data, answer with ONLY this JSON object:
{
  "content": "Short sentence introducing the table.",
  "table": {
    "headers": ["Col1", "Col2"],
    "rows": [["A", "100"], ["B", "200"]]
  }
}

3. Chart: when the user asks for a chart, or a chart is clearly more useful than a table, answer with ONLY one of these JSON objects.
For "pie-chart" and "doughnut-chart" use parallel "labels" and "data" arrays:
{
  "content": "Here is a pie chart of the data you requested.",
  "chart": {
    "type": "pie-chart",
    "title": "Chart Title",
    "labels": ["Label1", "Label2", "Label3"],
    "data": [30, 25, 45]
  }
}
For "bar-chart", "line-chart", "radar-chart" and "polar-area-chart" use "data" objects with "label" and "value":
{
  "content": "Here is a bar chart of the data you requested.",
  "chart": {
    "type": "bar-chart",
    "title": "Chart Title",
    "xAxis": "Category",
    "yAxis": "Value",
    "data": [
      { "label": "Label1", "value": 30 },
      { "label": "Label2", "value": 25 },
      { "label": "Label3", "value": 45 }
    ]
  }
}

4. Analytic card: only when the user asks for an analytic card, answer with ONLY this JSON object:
{
  "content": "Here is your analytic card:",
  "analyticCard": {
    "title": "Card title",
    "description": "Optional summary",
    "tabs": {
      "table": {
        "headers": ["Col1", "Col2"],
        "rows": [["A", "100"], ["B", "200"]]
      },
      "chart": {
        "type": "bar-chart",
        "xAxis": "Col1",
        "yAxis": "Col2",
        "data": [
          { "label": "A", "value": 100 },
          { "label": "B", "value": 200 }
        ]
      }
    }
  }
}

5. Analytic card with file download: only when the user asks for an analytic card with file download, answer with ONLY this JSON object:
{
  "analyticCardWithFileApi": {
    "table": {
      "title": "Report title",
      "description": "Optional summary",
      "data": {
        "headers": ["Col1", "Col2"],
        "rows": [["A", "100"], ["B", "200"]]
      }
    },
    "chart": {
      "title": "Chart title",
      "description": "Optional summary",
      "chartData": {
        "type": "bar-chart",
        "xAxis": "Col1",
        "yAxis": "Col2",
        "data": [
          { "label": "A", "value": 100 },
          { "label": "B", "value": 200 }
        ]
      }
    },
    "story": {
      "title": "Insights",
      "description": "Optional summary",
      "data": [
        "Row A has a value of 100.",
        "Row B has a value of 200."
      ]
    }
  }
}

Rules for every JSON answer:
- Return the JSON object alone, with no markdown code fences and no text before or after it.
- The JSON must be valid and parseable.
- Numbers in chart data must be JSON numbers, not strings.
"#;

/// 组装发送给后端的完整提示词
///
/// ## 功能说明
/// 按顺序拼接：协议说明、历史消息（每行 `role: content`，保持原顺序）、
/// 当前输入以及语言要求。纯函数，不修改历史记录。
///
/// ## 执行例子
/// ```rust
/// use insight_chat::protocol::{assemble, ChatTurn, Role};
///
/// let history = vec![ChatTurn::new(Role::User, "hi"), ChatTurn::new(Role::Assistant, "hello")];
/// let prompt = assemble(&history, "show me a table", "fr");
/// assert!(prompt.contains("user: hi\nassistant: hello"));
/// assert!(prompt.ends_with("(Note: respond in fr language.)\n"));
/// ```
pub fn assemble(history: &[ChatTurn], current_input: &str, language: &str) -> String {
    let language = if language.trim().is_empty() {
        DEFAULT_LANGUAGE
    } else {
        language.trim()
    };

    let chat_history = history
        .iter()
        .map(|turn| format!("{}: {}", turn.role, turn.content))
        .collect::<Vec<_>>()
        .join("\n");

    let mut prompt = String::with_capacity(
        PROTOCOL_INSTRUCTIONS.len() + chat_history.len() + current_input.len() + 96,
    );
    prompt.push_str(PROTOCOL_INSTRUCTIONS);
    prompt.push_str("\nConversation so far:\n");
    prompt.push_str(&chat_history);
    prompt.push_str("\n\nUser: ");
    prompt.push_str(current_input);
    prompt.push_str("\n(Note: respond in ");
    prompt.push_str(language);
    prompt.push_str(" language.)\n");
    prompt
}

/// Split a request's message list into prior history and the current input.
///
/// The last message is the current input; an empty list yields an empty input.
pub fn split_current(messages: &[ChatTurn]) -> (&[ChatTurn], &str) {
    match messages.split_last() {
        Some((last, history)) => (history, last.content.as_str()),
        None => (&[], ""),
    }
}
