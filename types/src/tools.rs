/// Tools offered to the model in the setup frame.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Tool {
    /// `{ "googleSearch": {} }`
    GoogleSearch(GoogleSearch),
    /// `{ "codeExecution": {} }`
    CodeExecution(CodeExecution),
    /// `{ "functionDeclarations": [...] }`
    FunctionDeclarations(Vec<FunctionDeclaration>),
}

impl Tool {
    pub fn google_search() -> Self {
        Tool::GoogleSearch(GoogleSearch {})
    }

    pub fn code_execution() -> Self {
        Tool::CodeExecution(CodeExecution {})
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct GoogleSearch {}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CodeExecution {}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FunctionDeclaration {
    /// The name of the function
    name: String,

    /// The description of the function
    description: String,

    /// The parameters of the function in JSON Schema format
    parameters: serde_json::Value,
}

impl FunctionDeclaration {
    pub fn new(name: String, description: String, parameters: serde_json::Value) -> Self {
        Self {
            name,
            description,
            parameters,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn parameters(&self) -> &serde_json::Value {
        &self.parameters
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_builtin_tools() {
        let json = serde_json::to_string(&Tool::google_search()).unwrap();
        assert_eq!(json, r#"{"googleSearch":{}}"#);

        let json = serde_json::to_string(&Tool::code_execution()).unwrap();
        assert_eq!(json, r#"{"codeExecution":{}}"#);
    }

    #[test]
    fn serialize_function_declarations() {
        let declaration = FunctionDeclaration::new(
            "get_current_weather".to_string(),
            "Get the current weather in a given location".to_string(),
            serde_json::json!({
                "type": "object",
                "properties": {
                    "location": { "type": "string" },
                    "unit": { "type": "string", "enum": ["celsius", "fahrenheit"] }
                },
                "required": ["location", "unit"]
            }),
        );
        let json = serde_json::to_string(&Tool::FunctionDeclarations(vec![declaration])).unwrap();
        assert!(json.starts_with(r#"{"functionDeclarations":[{"name":"get_current_weather""#));
    }
}
