//! 字符预算控制
//!
//! 大小 = 最终消息列表的 JSON 序列化长度 + system prompt 长度。
//! 超出预算时先裁掉最旧的历史消息，再裁最旧的本轮消息；system prompt 与用户请求永不裁剪。

use crate::context::message::combine_adjacent;
use crate::context::{Message, Role};

/// 列表开头不是 user 时补的占位消息
pub const LEADING_PLACEHOLDER: &str = "-->";
/// 列表结尾不是 user 时补的占位消息
pub const TRAILING_PLACEHOLDER: &str = "<--";

/// 按 history / 用户请求 / trailing 拼出最终列表，并补齐首尾的 user 占位
fn assemble(history: &[Message], user_request: &Message, trailing: &[Message]) -> Vec<Message> {
    let mut messages = Vec::with_capacity(history.len() + trailing.len() + 3);
    messages.extend_from_slice(history);
    messages.push(user_request.clone());
    messages.extend_from_slice(trailing);
    let mut messages = combine_adjacent(&messages);

    if messages.first().map(|m| m.role) != Some(Role::User) {
        messages.insert(0, Message::user(LEADING_PLACEHOLDER));
    }
    if messages.last().map(|m| m.role) != Some(Role::User) {
        messages.push(Message::user(TRAILING_PLACEHOLDER));
    }
    messages
}

/// 消息列表的计费大小
pub fn serialized_size(system_prompt: &str, messages: &[Message]) -> usize {
    serde_json::to_string(messages).map(|s| s.len()).unwrap_or(0) + system_prompt.len()
}

/// 在字符预算内组装消息；返回值不含 system 消息（由调用方单独传给模型）
pub fn limit_messages(
    history: &[Message],
    system_prompt: &str,
    user_request: &Message,
    trailing: &[Message],
    max_chars: usize,
) -> Vec<Message> {
    let history = combine_adjacent(history);
    let trailing = combine_adjacent(trailing);
    let mut history_start = 0;
    let mut trailing_start = 0;

    let mut messages =
        assemble(&history[history_start..], user_request, &trailing[trailing_start..]);
    while serialized_size(system_prompt, &messages) > max_chars && history_start < history.len() {
        history_start += 1;
        messages = assemble(&history[history_start..], user_request, &trailing[trailing_start..]);
    }
    while serialized_size(system_prompt, &messages) > max_chars && trailing_start < trailing.len() {
        trailing_start += 1;
        messages = assemble(&history[history_start..], user_request, &trailing[trailing_start..]);
    }

    if history_start > 0 || trailing_start > 0 {
        tracing::debug!(
            dropped_history = history_start,
            dropped_trailing = trailing_start,
            size = serialized_size(system_prompt, &messages),
            max_chars,
            "context trimmed to budget"
        );
    }
    messages
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history(n: usize) -> Vec<Message> {
        (0..n)
            .flat_map(|i| {
                vec![
                    Message::user(format!("request {i} {}", "x".repeat(100))),
                    Message::assistant(format!("answer {i} {}", "y".repeat(100))),
                ]
            })
            .collect()
    }

    #[test]
    fn test_fits_without_trimming() {
        let msgs = limit_messages(&[], "sys", &Message::user("hi"), &[], 10_000);
        assert_eq!(msgs, vec![Message::user("hi")]);
    }

    #[test]
    fn test_padding_when_trailing_ends_with_assistant() {
        let msgs = limit_messages(
            &[Message::assistant("earlier")],
            "sys",
            &Message::user("hi"),
            &[Message::assistant("a"), Message::assistant("b")],
            10_000,
        );
        assert_eq!(msgs.first().unwrap().content, LEADING_PLACEHOLDER);
        assert_eq!(msgs.last().unwrap().content, TRAILING_PLACEHOLDER);
        // 相邻 assistant 合并为一条
        assert_eq!(msgs[3].content, "a\n\nb");
    }

    #[test]
    fn test_history_trimmed_before_trailing() {
        let trailing = vec![Message::assistant("z".repeat(50))];
        let system = "system prompt";
        let user = Message::user("do it");
        let full = limit_messages(&history(5), system, &user, &trailing, usize::MAX);
        let budget = serialized_size(system, &full) - 300;
        let msgs = limit_messages(&history(5), system, &user, &trailing, budget);
        assert!(serialized_size(system, &msgs) <= budget);
        assert!(msgs.iter().any(|m| m.content == "z".repeat(50)));
        assert!(!msgs.iter().any(|m| m.content.starts_with("request 0")));
    }

    #[test]
    fn test_budget_holds_for_any_admissible_budget() {
        let system = "You are a careful agent.";
        let user = Message::user("summarize then visualize");
        let trailing: Vec<Message> = (0..4).map(|i| Message::assistant(format!("t{i}"))).collect();
        let floor = serialized_size(system, std::slice::from_ref(&user));
        let everything = limit_messages(&history(6), system, &user, &trailing, usize::MAX);
        let full = serialized_size(system, &everything);
        for budget in (floor..=full + 10).step_by(7) {
            let msgs = limit_messages(&history(6), system, &user, &trailing, budget);
            assert!(serialized_size(system, &msgs) <= budget, "budget {budget}");
            assert!(msgs.contains(&user));
        }
    }
}
