use serde::{Deserialize, Serialize};

/// A single message in a conversation batch, the opaque payload value that
/// flows through topics.
///
/// Each message has a role (typically "user", "assistant", "system", or
/// "tool"), text content, and optionally the function calls an assistant
/// requested. Batches of messages (`Vec<Message>`) are what topics append,
/// nodes consume, and tools receive.
///
/// # Examples
///
/// ```
/// use topicflow::message::Message;
///
/// let user_msg = Message::user("What's the weather like?");
/// let assistant_msg = Message::assistant("It's sunny today!");
/// let system_msg = Message::system("You are a helpful assistant.");
///
/// assert!(user_msg.has_role(Message::USER));
/// assert!(!assistant_msg.has_tool_call());
/// ```
///
/// # Serialization
///
/// Messages are embedded in persisted event records, so they round-trip
/// through serde:
///
/// ```
/// use topicflow::message::Message;
///
/// let msg = Message::user("test");
/// let json = serde_json::to_string(&msg).unwrap();
/// let parsed: Message = serde_json::from_str(&json).unwrap();
/// assert_eq!(msg, parsed);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Message {
    /// The role of the message sender (e.g., "user", "assistant", "tool").
    ///
    /// Use the constants on [`Message`] for standardized values.
    pub role: String,
    /// The text content of the message.
    pub content: String,
    /// Function calls requested by this message, if any.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

impl Message {
    /// User input message role.
    pub const USER: &'static str = "user";
    /// AI assistant response message role.
    pub const ASSISTANT: &'static str = "assistant";
    /// System prompt or instruction message role.
    pub const SYSTEM: &'static str = "system";
    /// Tool/function result message role.
    pub const TOOL: &'static str = "tool";

    /// Creates a new message with the specified role and content.
    #[must_use]
    pub fn new(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: content.to_string(),
            tool_calls: Vec::new(),
        }
    }

    /// Creates a user message with the specified content.
    #[must_use]
    pub fn user(content: &str) -> Self {
        Self::new(Self::USER, content)
    }

    /// Creates an assistant message with the specified content.
    #[must_use]
    pub fn assistant(content: &str) -> Self {
        Self::new(Self::ASSISTANT, content)
    }

    /// Creates a system message with the specified content.
    #[must_use]
    pub fn system(content: &str) -> Self {
        Self::new(Self::SYSTEM, content)
    }

    /// Creates a tool-result message with the specified content.
    #[must_use]
    pub fn tool(content: &str) -> Self {
        Self::new(Self::TOOL, content)
    }

    /// Attach function-call requests to this message.
    ///
    /// # Examples
    /// ```
    /// use topicflow::message::{Message, ToolCall};
    /// use serde_json::json;
    ///
    /// let msg = Message::assistant("")
    ///     .with_tool_calls(vec![ToolCall::new("search", json!({"query": "rust"}))]);
    /// assert!(msg.has_tool_call());
    /// ```
    #[must_use]
    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        self.tool_calls = tool_calls;
        self
    }

    /// Returns true if this message has the specified role.
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.role == role
    }

    /// Returns true if this message carries at least one function call.
    #[must_use]
    pub fn has_tool_call(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// A function-call request embedded in an assistant message.
///
/// Produced by language-model backends that support function calling and
/// consumed by function-call tools downstream; also the unit matched by the
/// stock tool-call publication gates.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Correlation id assigned by the producing backend.
    pub id: String,
    /// Name of the callable being requested.
    pub name: String,
    /// JSON arguments for the call.
    pub arguments: serde_json::Value,
}

impl ToolCall {
    /// Creates a tool call with a generated correlation id.
    #[must_use]
    pub fn new(name: &str, arguments: serde_json::Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            arguments,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    /// Verifies that a Message struct can be constructed and its fields are set correctly.
    fn test_message_construction() {
        let msg = Message::new("user", "hello");
        assert_eq!(msg.role, "user");
        assert_eq!(msg.content, "hello");
        assert!(msg.tool_calls.is_empty());
    }

    #[test]
    /// Tests convenience constructors for common message types.
    fn test_convenience_constructors() {
        let user_msg = Message::user("Hello");
        assert_eq!(user_msg.role, Message::USER);

        let assistant_msg = Message::assistant("Hi there!");
        assert_eq!(assistant_msg.role, Message::ASSISTANT);

        let system_msg = Message::system("You are helpful");
        assert_eq!(system_msg.role, Message::SYSTEM);

        let tool_msg = Message::tool("Result: 42");
        assert_eq!(tool_msg.role, Message::TOOL);
        assert_eq!(tool_msg.content, "Result: 42");
    }

    #[test]
    /// Tests role checking methods.
    fn test_role_checking() {
        let user_msg = Message::user("Hello");
        assert!(user_msg.has_role(Message::USER));
        assert!(!user_msg.has_role(Message::ASSISTANT));
    }

    #[test]
    fn test_tool_call_detection() {
        let plain = Message::assistant("no calls here");
        assert!(!plain.has_tool_call());

        let with_call = Message::assistant("")
            .with_tool_calls(vec![ToolCall::new("lookup", json!({"key": "x"}))]);
        assert!(with_call.has_tool_call());
        assert_eq!(with_call.tool_calls[0].name, "lookup");
    }

    #[test]
    /// Tests serialization and deserialization, including the tool_calls field.
    fn test_serialization() {
        let original = Message::assistant("calling")
            .with_tool_calls(vec![ToolCall::new("search", json!({"query": "rust"}))]);
        let json = serde_json::to_string(&original).expect("Serialization failed");
        let deserialized: Message = serde_json::from_str(&json).expect("Deserialization failed");

        assert_eq!(original, deserialized);

        // tool_calls is omitted entirely for plain messages
        let plain_json = serde_json::to_string(&Message::user("hi")).unwrap();
        assert!(!plain_json.contains("tool_calls"));
    }
}
