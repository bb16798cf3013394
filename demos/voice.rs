use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FrameCount, StreamConfig};
use rubato::Resampler;
use tracing::Level;
use tracing_subscriber::fmt::time::ChronoLocal;

use gemini_live::types::{FunctionDeclaration, LiveConfig, MediaChunk, Modality, Tool};
use gemini_live::utils;
use gemini_live::utils::audio::LIVE_API_INPUT_SAMPLE_RATE;
use gemini_live::LiveEvent;

const INPUT_CHUNK_SIZE: usize = 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv_override().ok();

    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    // Setup audio input device
    let input = utils::device::get_or_default_input(None)?;
    let input_config = input.default_input_config()?;
    let input_config = StreamConfig {
        channels: input_config.channels(),
        sample_rate: input_config.sample_rate(),
        buffer_size: cpal::BufferSize::Fixed(FrameCount::from(INPUT_CHUNK_SIZE as u32)),
    };
    println!(
        "input: device={:?}, config={:?}",
        &input.name().unwrap_or_else(|_| "unknown".into()),
        &input_config
    );
    let input_channel_count = input_config.channels as usize;
    let input_sample_rate = input_config.sample_rate.0 as f64;

    let (mic_tx, mut mic_rx) = tokio::sync::mpsc::channel::<Vec<f32>>(1024);
    let input_data_fn = move |data: &[f32], _: &cpal::InputCallbackInfo| {
        // mix down to mono before shipping to the resampler
        let mono: Vec<f32> = data
            .chunks(input_channel_count)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect();
        if let Err(e) = mic_tx.try_send(mono) {
            eprintln!("Failed to send audio data to buffer: {:?}", e);
        }
    };
    let input_stream = input.build_input_stream(
        &input_config,
        input_data_fn,
        move |err| eprintln!("an error occurred on input stream: {}", err),
        None,
    )?;
    input_stream.play()?;

    let get_current_weather = FunctionDeclaration::new(
        "get_current_weather".to_string(),
        "Get the current weather in a given location".to_string(),
        serde_json::json!({
            "type": "object",
            "properties": {
                "location": {
                    "type": "string",
                    "description": "The city and state, e.g. San Francisco, CA"
                },
                "unit": { "type": "string", "enum": ["celsius", "fahrenheit"] }
            },
            "required": ["location", "unit"]
        }),
    );

    let live_config = LiveConfig::builder()
        .with_response_modalities(vec![Modality::Audio])
        .with_system_instruction("You are a helpful assistant.")
        .with_tool(Tool::google_search())
        .with_tool(Tool::code_execution())
        .with_tool(Tool::FunctionDeclarations(vec![get_current_weather]))
        .build();

    let mut client = gemini_live::connect(live_config).await?;
    let mut events = client.events();
    client.user_transcriber().start().await.ok();

    let event_handle = tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(_) => break,
            };
            match event {
                LiveEvent::Content(turn) => {
                    for part in turn.parts() {
                        if let Some(text) = part.text() {
                            println!("AI: {}", text);
                        }
                        if let Some(code) = part.executable_code() {
                            println!("AI code ({}):\n{}", code.language(), code.code());
                        }
                    }
                }
                LiveEvent::Transcript(fragment) => {
                    if let Some(text) = fragment.text() {
                        println!("[{}] {}", fragment.source(), text);
                    }
                }
                LiveEvent::ToolCall(tool_call) => {
                    for call in tool_call.function_calls() {
                        println!("tool call: {}({})", call.name(), call.args());
                    }
                }
                LiveEvent::Interrupted => println!("(interrupted)"),
                LiveEvent::Close { reason } => {
                    println!("connection closed: {:?}", reason);
                    break;
                }
                _ => {}
            }
        }
    });

    let mut in_resampler = utils::audio::create_resampler(
        input_sample_rate,
        LIVE_API_INPUT_SAMPLE_RATE,
        INPUT_CHUNK_SIZE,
    )?;

    let mic_handle = {
        let mut buffer: std::collections::VecDeque<f32> =
            std::collections::VecDeque::with_capacity(INPUT_CHUNK_SIZE * 2);
        async move {
            while let Some(samples) = mic_rx.recv().await {
                buffer.extend(samples);
                let mut resampled: Vec<f32> = vec![];
                while buffer.len() >= INPUT_CHUNK_SIZE {
                    let audio: Vec<f32> = buffer.drain(..INPUT_CHUNK_SIZE).collect();
                    if let Ok(resamples) = in_resampler.process(&[audio.as_slice()], None) {
                        if let Some(resamples) = resamples.first() {
                            resampled.extend(resamples.iter().cloned());
                        }
                    }
                }
                if resampled.is_empty() {
                    continue;
                }
                let chunk = MediaChunk::new(
                    "audio/pcm;rate=16000",
                    utils::audio::encode(&resampled),
                );
                if let Err(e) = client.send_realtime_input(vec![chunk]).await {
                    eprintln!("failed to send audio: {}", e);
                    break;
                }
            }
            client
        }
    };

    tokio::select! {
        _ = event_handle => {}
        mut client = mic_handle => {
            client.disconnect();
        }
        _ = tokio::signal::ctrl_c() => {
            println!("Received Ctrl-C, shutting down...");
        }
    }
    println!("Shutting down...");
    Ok(())
}
