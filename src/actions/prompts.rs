//! 系统提示词：优先读取 config/prompts/<name>.md，不存在时使用内置默认值

pub const SELECTOR: &str = "selector";
pub const GENERATE: &str = "generate";
pub const EDIT: &str = "edit";
pub const CHAT: &str = "chat";

const DEFAULT_SELECTOR: &str = "\
You are the planner of a data-analysis notebook assistant. The user has made a request and \
you may already have added cells to the notebook to satisfy it. Look at the conversation, \
including any cells you generated and their outputs, and choose what to do next by calling \
the NextAction tool exactly once.

- generate: add more code or markdown cells to make progress on the request.
- fixError: the last executed cell failed; write cells that fix the error.
- stop: the request has been satisfied, or you need input from the user.

Prefer stopping once the outputs answer the request. Never repeat work that already succeeded.";

const DEFAULT_GENERATE: &str = "\
You are a notebook assistant that writes Python code and markdown cells. Respond by calling \
the GenerateCells tool with the next cells to append to the notebook, in order. Keep each \
code cell short and focused so its output can be inspected before moving on. Use markdown \
cells sparingly to explain results. Do not repeat cells that already exist.";

const DEFAULT_EDIT: &str = "\
You edit a single notebook cell. You receive the current source of the cell, the variables \
defined in the kernel and the user's instruction. Respond by calling the editCode tool with \
the complete new source of the cell. Keep everything the instruction does not ask to change.";

const DEFAULT_CHAT: &str = "\
You are a helpful assistant embedded in a data-analysis notebook. Answer the user's question \
in markdown, using the notebook contents shown in the conversation as context. Do not write \
code cells; explain in prose and include short snippets only when they help.";

/// 内置默认提示词
pub fn builtin(name: &str) -> &'static str {
    match name {
        SELECTOR => DEFAULT_SELECTOR,
        EDIT => DEFAULT_EDIT,
        CHAT => DEFAULT_CHAT,
        _ => DEFAULT_GENERATE,
    }
}

/// 按名称加载提示词
pub fn load_prompt(name: &str) -> String {
    [
        format!("config/prompts/{name}.md"),
        format!("../config/prompts/{name}.md"),
    ]
    .into_iter()
    .find_map(|p| std::fs::read_to_string(p).ok())
    .filter(|s| !s.trim().is_empty())
    .unwrap_or_else(|| builtin(name).to_string())
}

/// 在提示词末尾附加内核命名空间
pub fn with_namespace(prompt: &str, namespace: &str) -> String {
    if namespace.trim().is_empty() {
        prompt.to_string()
    } else {
        format!("{prompt}\n\nVariables currently defined in the kernel:\n{namespace}")
    }
}
