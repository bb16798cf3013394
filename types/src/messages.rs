//! Wire frames exchanged over the live connection.
//!
//! Every message is one JSON object keyed by its kind, so both directions are
//! modeled as externally tagged enums: unknown shapes fail to deserialize and
//! are handled (logged, ignored) at the classification boundary.

/// Messages sent by the client over the live connection.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    /// `{ "setup": {...} }`, sent once per connection before anything else
    Setup(crate::config::LiveConfig),
    /// `{ "clientContent": {...} }`
    ClientContent(ClientContent),
    /// `{ "realtimeInput": {...} }`, one frame per media chunk
    RealtimeInput(RealtimeInput),
    /// `{ "toolResponse": {...} }`
    ToolResponse(ToolResponse),
}

/// Messages received from the server over the live connection.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ServerMessage {
    /// `{ "toolCall": {...} }`
    ToolCall(ToolCall),
    /// `{ "toolCallCancellation": {...} }`
    ToolCallCancellation(ToolCallCancellation),
    /// `{ "setupComplete": {} }`
    SetupComplete(SetupComplete),
    /// `{ "serverContent": {...} }`
    ServerContent(ServerContent),
}

/// `clientContent` payload: ordered turns plus the end-of-turn flag.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientContent {
    turns: Vec<Content>,
    turn_complete: bool,
}

impl ClientContent {
    pub fn new(turns: Vec<Content>, turn_complete: bool) -> Self {
        Self {
            turns,
            turn_complete,
        }
    }

    pub fn turns(&self) -> &[Content] {
        &self.turns
    }

    pub fn turn_complete(&self) -> bool {
        self.turn_complete
    }
}

/// `realtimeInput` payload: a single mime-typed base64 chunk.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    media: MediaChunk,
}

impl RealtimeInput {
    pub fn new(media: MediaChunk) -> Self {
        Self { media }
    }

    pub fn media(&self) -> &MediaChunk {
        &self.media
    }
}

/// `toolResponse` payload: responses keyed by the originating call id.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    function_responses: Vec<FunctionResponse>,
}

impl ToolResponse {
    pub fn new(function_responses: Vec<FunctionResponse>) -> Self {
        Self { function_responses }
    }

    pub fn function_responses(&self) -> &[FunctionResponse] {
        &self.function_responses
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionResponse {
    /// The id of the function call this responds to
    id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,

    /// Opaque response payload; the backend is authoritative about its shape
    response: serde_json::Value,
}

impl FunctionResponse {
    pub fn new(id: &str, name: Option<&str>, response: serde_json::Value) -> Self {
        Self {
            id: id.to_string(),
            name: name.map(|n| n.to_string()),
            response,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn response(&self) -> &serde_json::Value {
        &self.response
    }
}

/// One conversational turn: an ordered list of parts with an optional role.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<Part>,
}

impl Content {
    pub fn user(parts: Vec<Part>) -> Self {
        Self {
            role: Some("user".to_string()),
            parts,
        }
    }

    /// A role-less turn, used for system instructions.
    pub fn from_parts(parts: Vec<Part>) -> Self {
        Self { role: None, parts }
    }

    pub fn role(&self) -> Option<&str> {
        self.role.as_deref()
    }

    pub fn parts(&self) -> &[Part] {
        &self.parts
    }
}

/// Atomic content unit: text, inline binary data, or code-execution traffic.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<MediaChunk>,
    #[serde(skip_serializing_if = "Option::is_none")]
    executable_code: Option<ExecutableCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    code_execution_result: Option<CodeExecutionResult>,
}

impl Part {
    pub fn from_text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            ..Self::default()
        }
    }

    pub fn from_inline_data(chunk: MediaChunk) -> Self {
        Self {
            inline_data: Some(chunk),
            ..Self::default()
        }
    }

    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    pub fn inline_data(&self) -> Option<&MediaChunk> {
        self.inline_data.as_ref()
    }

    pub fn executable_code(&self) -> Option<&ExecutableCode> {
        self.executable_code.as_ref()
    }

    pub fn code_execution_result(&self) -> Option<&CodeExecutionResult> {
        self.code_execution_result.as_ref()
    }

    /// True for inline PCM audio, the only part kind never surfaced as content.
    pub fn is_audio(&self) -> bool {
        self.inline_data
            .as_ref()
            .is_some_and(|chunk| chunk.is_pcm_audio())
    }
}

/// Mime-typed, base64-encoded binary payload.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaChunk {
    mime_type: String,
    data: String,
}

impl MediaChunk {
    pub fn new(mime_type: &str, data: String) -> Self {
        Self {
            mime_type: mime_type.to_string(),
            data,
        }
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn data(&self) -> &str {
        &self.data
    }

    pub fn is_pcm_audio(&self) -> bool {
        self.mime_type.starts_with("audio/pcm")
    }

    pub fn is_audio(&self) -> bool {
        self.mime_type.starts_with("audio")
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image")
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutableCode {
    language: String,
    code: String,
}

impl ExecutableCode {
    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn code(&self) -> &str {
        &self.code
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeExecutionResult {
    outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    output: Option<String>,
}

impl CodeExecutionResult {
    pub fn outcome(&self) -> &str {
        &self.outcome
    }

    pub fn output(&self) -> Option<&str> {
        self.output.as_deref()
    }
}

/// `toolCall` payload
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    function_calls: Vec<FunctionCall>,
}

impl ToolCall {
    pub fn function_calls(&self) -> &[FunctionCall] {
        &self.function_calls
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionCall {
    id: String,
    name: String,
    #[serde(default)]
    args: serde_json::Value,
}

impl FunctionCall {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &serde_json::Value {
        &self.args
    }
}

/// `toolCallCancellation` payload: ids of calls the backend withdrew.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallCancellation {
    ids: Vec<String>,
}

impl ToolCallCancellation {
    pub fn ids(&self) -> &[String] {
        &self.ids
    }
}

/// `setupComplete` payload
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SetupComplete {}

/// `serverContent` payload. A single frame may carry both the `turnComplete`
/// flag and a trailing model turn.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    interrupted: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    turn_complete: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    model_turn: Option<ModelTurn>,
}

impl ServerContent {
    pub fn is_interrupted(&self) -> bool {
        self.interrupted.unwrap_or(false)
    }

    pub fn is_turn_complete(&self) -> bool {
        self.turn_complete.unwrap_or(false)
    }

    pub fn model_turn(&self) -> Option<&ModelTurn> {
        self.model_turn.as_ref()
    }

    pub fn into_model_turn(self) -> Option<ModelTurn> {
        self.model_turn
    }
}

/// One backend response unit: an ordered sequence of parts.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelTurn {
    parts: Vec<Part>,
}

impl ModelTurn {
    pub fn new(parts: Vec<Part>) -> Self {
        Self { parts }
    }

    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    pub fn into_parts(self) -> Vec<Part> {
        self.parts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_tool_call() {
        let json = r#"{"toolCall":{"functionCalls":[{"id":"call-7","name":"get_current_weather","args":{"location":"San Francisco, CA","unit":"celsius"}}]}}"#;
        let message: ServerMessage = serde_json::from_str(json).unwrap();
        match message {
            ServerMessage::ToolCall(tool_call) => {
                let calls = tool_call.function_calls();
                assert_eq!(calls.len(), 1);
                assert_eq!(calls[0].id(), "call-7");
                assert_eq!(calls[0].name(), "get_current_weather");
                assert_eq!(calls[0].args()["unit"], "celsius");
            }
            other => panic!("expected toolCall, got {:?}", other),
        }
    }

    #[test]
    fn deserialize_tool_call_cancellation() {
        let json = r#"{"toolCallCancellation":{"ids":["call-7","call-8"]}}"#;
        let message: ServerMessage = serde_json::from_str(json).unwrap();
        match message {
            ServerMessage::ToolCallCancellation(cancellation) => {
                assert_eq!(cancellation.ids(), ["call-7", "call-8"]);
            }
            other => panic!("expected toolCallCancellation, got {:?}", other),
        }
    }

    #[test]
    fn deserialize_setup_complete() {
        let json = r#"{"setupComplete":{}}"#;
        let message: ServerMessage = serde_json::from_str(json).unwrap();
        assert!(matches!(message, ServerMessage::SetupComplete(_)));
    }

    #[test]
    fn deserialize_server_content_flags() {
        let json = r#"{"serverContent":{"interrupted":true}}"#;
        let message: ServerMessage = serde_json::from_str(json).unwrap();
        match message {
            ServerMessage::ServerContent(content) => {
                assert!(content.is_interrupted());
                assert!(!content.is_turn_complete());
                assert!(content.model_turn().is_none());
            }
            other => panic!("expected serverContent, got {:?}", other),
        }
    }

    #[test]
    fn deserialize_model_turn_with_audio_part() {
        let json = r#"{"serverContent":{"turnComplete":true,"modelTurn":{"parts":[{"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"AQIDBA=="}},{"text":"done"}]}}}"#;
        let message: ServerMessage = serde_json::from_str(json).unwrap();
        let content = match message {
            ServerMessage::ServerContent(content) => content,
            other => panic!("expected serverContent, got {:?}", other),
        };
        assert!(content.is_turn_complete());
        let turn = content.into_model_turn().unwrap();
        assert_eq!(turn.parts().len(), 2);
        assert!(turn.parts()[0].is_audio());
        assert!(!turn.parts()[1].is_audio());
        assert_eq!(turn.parts()[1].text(), Some("done"));
    }

    #[test]
    fn deserialize_code_execution_parts() {
        let json = r#"{"serverContent":{"modelTurn":{"parts":[{"executableCode":{"language":"PYTHON","code":"print(1)"}},{"codeExecutionResult":{"outcome":"OUTCOME_OK","output":"1\n"}}]}}}"#;
        let message: ServerMessage = serde_json::from_str(json).unwrap();
        let ServerMessage::ServerContent(content) = message else {
            panic!("expected serverContent");
        };
        let turn = content.into_model_turn().unwrap();
        assert_eq!(turn.parts()[0].executable_code().unwrap().code(), "print(1)");
        assert_eq!(
            turn.parts()[1].code_execution_result().unwrap().outcome(),
            "OUTCOME_OK"
        );
        assert!(!turn.parts()[0].is_audio());
    }

    #[test]
    fn unknown_message_shapes_do_not_parse() {
        let err = serde_json::from_str::<ServerMessage>(r#"{"usageMetadata":{}}"#);
        assert!(err.is_err());
    }

    #[test]
    fn serialize_client_content() {
        let message = ClientMessage::ClientContent(ClientContent::new(
            vec![Content::user(vec![Part::from_text("hi")])],
            true,
        ));
        let json = serde_json::to_string(&message).unwrap();
        let expected = r#"{"clientContent":{"turns":[{"role":"user","parts":[{"text":"hi"}]}],"turnComplete":true}}"#;
        assert_eq!(json, expected);
    }

    #[test]
    fn serialize_realtime_input() {
        let chunk = MediaChunk::new("audio/pcm;rate=16000", "AQI=".to_string());
        assert!(chunk.is_audio());
        assert!(chunk.is_pcm_audio());
        assert!(!chunk.is_image());
        let message = ClientMessage::RealtimeInput(RealtimeInput::new(chunk));
        let json = serde_json::to_string(&message).unwrap();
        let expected =
            r#"{"realtimeInput":{"media":{"mimeType":"audio/pcm;rate=16000","data":"AQI="}}}"#;
        assert_eq!(json, expected);
    }

    #[test]
    fn serialize_tool_response() {
        let message = ClientMessage::ToolResponse(ToolResponse::new(vec![FunctionResponse::new(
            "call-7",
            Some("get_current_weather"),
            serde_json::json!({"temperature": 21}),
        )]));
        let json = serde_json::to_string(&message).unwrap();
        let expected = r#"{"toolResponse":{"functionResponses":[{"id":"call-7","name":"get_current_weather","response":{"temperature":21}}]}}"#;
        assert_eq!(json, expected);
    }
}
