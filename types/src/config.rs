use crate::messages::{Content, Part};
use crate::tools::Tool;

/// The setup frame payload, sent once per connection.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveConfig {
    /// Model resource name, e.g. "models/gemini-2.0-flash-exp"
    model: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,

    /// System instructions prepended to model calls
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,

    /// Tools available to the model
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    tools: Vec<Tool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    speech_config: Option<SpeechConfig>,
}

impl LiveConfig {
    pub fn builder() -> LiveConfigBuilder {
        LiveConfigBuilder::new()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn generation_config(&self) -> Option<&GenerationConfig> {
        self.generation_config.as_ref()
    }

    pub fn system_instruction(&self) -> Option<&Content> {
        self.system_instruction.as_ref()
    }

    pub fn tools(&self) -> &[Tool] {
        &self.tools
    }

    pub fn speech_config(&self) -> Option<&SpeechConfig> {
        self.speech_config.as_ref()
    }
}

pub struct LiveConfigBuilder {
    config: LiveConfig,
}

impl Default for LiveConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: LiveConfig {
                model: "models/gemini-2.0-flash-exp".to_string(),
                generation_config: None,
                system_instruction: None,
                tools: vec![],
                speech_config: None,
            },
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.config.model = model.to_string();
        self
    }

    pub fn with_generation_config(mut self, generation_config: GenerationConfig) -> Self {
        self.config.generation_config = Some(generation_config);
        self
    }

    pub fn with_response_modalities(mut self, modalities: Vec<Modality>) -> Self {
        let generation_config = self.config.generation_config.get_or_insert_with(GenerationConfig::default);
        generation_config.response_modalities = Some(modalities);
        self
    }

    pub fn with_system_instruction(mut self, instruction: &str) -> Self {
        self.config.system_instruction =
            Some(Content::from_parts(vec![Part::from_text(instruction)]));
        self
    }

    pub fn with_tools(mut self, tools: Vec<Tool>) -> Self {
        self.config.tools = tools;
        self
    }

    pub fn with_tool(mut self, tool: Tool) -> Self {
        self.config.tools.push(tool);
        self
    }

    pub fn with_speech_config(mut self, speech_config: SpeechConfig) -> Self {
        self.config.speech_config = Some(speech_config);
        self
    }

    /// Shorthand for a speech config naming a prebuilt voice.
    pub fn with_voice(mut self, voice_name: &str) -> Self {
        self.config.speech_config = Some(SpeechConfig::voice(voice_name));
        self
    }

    pub fn build(self) -> LiveConfig {
        self.config
    }
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    /// Modalities the model may respond with; audio disables text responses
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) response_modalities: Option<Vec<Modality>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<i32>,
}

impl GenerationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response_modalities(mut self, modalities: Vec<Modality>) -> Self {
        self.response_modalities = Some(modalities);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_output_tokens(mut self, max_output_tokens: i32) -> Self {
        self.max_output_tokens = Some(max_output_tokens);
        self
    }

    pub fn response_modalities(&self) -> Option<&[Modality]> {
        self.response_modalities.as_deref()
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Modality {
    #[serde(rename = "TEXT")]
    Text,
    #[serde(rename = "AUDIO")]
    Audio,
}

/// Voice selection for audio responses.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    voice_config: Option<VoiceConfig>,
}

impl SpeechConfig {
    pub fn voice(voice_name: &str) -> Self {
        Self {
            voice_config: Some(VoiceConfig {
                prebuilt_voice_config: PrebuiltVoiceConfig {
                    voice_name: voice_name.to_string(),
                },
            }),
        }
    }

    pub fn voice_name(&self) -> Option<&str> {
        self.voice_config
            .as_ref()
            .map(|config| config.prebuilt_voice_config.voice_name.as_str())
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct VoiceConfig {
    prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct PrebuiltVoiceConfig {
    voice_name: String,
}
