// Per-emotion emoticons, colours and prompts shown next to the mood

/// Outline colour for labels without an entry
pub const DEFAULT_COLOR: [u8; 3] = [0x63, 0x66, 0xf1];

/// Text shown to invite a recommendation request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MoodPrompt {
    pub text: String,
    pub action: String,
}

/// Emoticon for a label, `:-|` when unknown
pub fn emoticon(label: &str) -> &'static str {
    match label {
        "happy" => ":-)",
        "sad" => ":-(",
        "angry" => "X-(",
        "fearful" | "fear" | "surprised" | "surprise" => ":-O",
        "disgusted" | "disgust" => ":-/",
        _ => ":-|",
    }
}

/// RGB outline colour used for a face whose dominant label is `label`
pub fn emotion_color(label: &str) -> [u8; 3] {
    match label {
        "neutral" => [0x94, 0xa3, 0xb8],
        "happy" => [0x22, 0xc5, 0x5e],
        "sad" => [0x3b, 0x82, 0xf6],
        "angry" => [0xef, 0x44, 0x44],
        "fearful" | "fear" => [0xa8, 0x55, 0xf7],
        "disgusted" | "disgust" => [0x84, 0xcc, 0x16],
        "surprised" | "surprise" => [0xf5, 0x9e, 0x0b],
        _ => DEFAULT_COLOR,
    }
}

/// Prompt and button label offered for a mood
pub fn prompt_for(label: &str) -> MoodPrompt {
    let (text, action) = match label {
        "sad" => ("You seem a bit down. Want some cheering up?", "Cheer Me Up"),
        "happy" => ("You look great! Want to keep the vibes going?", "Enhance Mood"),
        "angry" => ("Take a deep breath. Need some calming suggestions?", "Calm Down"),
        "fearful" | "fear" => ("Feeling anxious? Let me help you relax.", "Find Peace"),
        "disgusted" | "disgust" => (
            "Something bothering you? Let's shift focus.",
            "Fresh Perspective",
        ),
        "surprised" | "surprise" => ("Surprised? Let's explore that feeling!", "Explore More"),
        "neutral" => ("Feeling balanced. Want some inspiration?", "Get Inspired"),
        other => {
            return MoodPrompt {
                text: format!("Detected: {other}. Get personalized insights!"),
                action: "Get AI Insights".to_string(),
            }
        }
    };
    MoodPrompt {
        text: text.to_string(),
        action: action.to_string(),
    }
}

/// Rounded percentage of a confidence in [0, 1]
pub fn percent(confidence: f32) -> u8 {
    (confidence.clamp(0.0, 1.0) * 100.0).round() as u8
}

/// Mood indicator text, e.g. `happy (80%)`
pub fn format_confidence(label: &str, confidence: f32) -> String {
    format!("{} ({}%)", label, percent(confidence))
}

/// Strips `**bold**` markers from recommendation text for plain display
pub fn plain_recommendation(text: &str) -> String {
    text.replace("**", "")
}
