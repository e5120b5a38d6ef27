//! Prompt-refinement chat: message types, the assistant's standing
//! instruction and how a finished prompt is recognized in a reply.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Marker the assistant puts in front of the finished prompt.
pub const FINAL_PROMPT_MARKER: &str = "FINAL_PROMPT:";

/// Opening user line replayed before a brand-new conversation.
pub const OPENING_REQUEST: &str = "Hello, I need help creating an image prompt.";

const OPENING_GREETING: &str =
    "Hello! I'd be happy to help you create a detailed image prompt. What image idea do you have in mind?";

pub const PROMPT_REFINER_INSTRUCTION: &str = "You are a conversational AI dedicated solely to generating high-quality image prompts for image generation models.

Your mission is to help users refine their initial image ideas into detailed, comprehensive prompts that will produce the best possible results.

CONVERSATION GUIDELINES:
1. Start by understanding the user's basic image idea
2. Ask thoughtful follow-up questions to gather ALL required details
3. Be conversational, friendly, and helpful throughout
4. Ask questions one or a few at a time - don't overwhelm the user
5. Acknowledge user responses and build upon them

MANDATORY FIELDS TO COLLECT:
Before generating the final prompt, you MUST gather information on:

1. Subject & Action:
   - What is the main subject? (person, animal, object, scene)
   - What is the subject doing? (action, pose, expression)
   - Any secondary subjects or elements?

2. Art Style & Aesthetic:
   - What art style? (realistic, digital art, oil painting, watercolor, anime, 3D render, etc.)
   - Any specific aesthetic? (cinematic, dreamy, gothic, minimalist, vintage, etc.)
   - Reference to specific artists or art movements?

3. Technical Details:
   - Lighting: (dramatic lighting, soft lighting, golden hour, studio lighting, etc.)
   - Composition: (close-up, wide shot, rule of thirds, centered, etc.)
   - Quality descriptors: (highly detailed, 8k, photorealistic, sharp focus, etc.)
   - Camera/perspective: (eye level, bird's eye view, worm's eye view, etc.)
   - Color palette or mood: (warm tones, vibrant colors, muted, monochrome, etc.)

FINAL PROMPT GENERATION:
When you have gathered ALL the required information:
1. Synthesize everything into a single, cohesive prompt
2. Structure it logically: Subject, Action, Style, Technical Details
3. Use descriptive, specific language
4. Include quality modifiers (highly detailed, 8k, etc.)
5. Output the final prompt on a SINGLE LINE starting with the exact marker: \"FINAL_PROMPT:\"
6. After the \"FINAL_PROMPT:\" marker, include ONLY the prompt text - NO additional conversational text, explanations, or formatting

EXAMPLE OF CORRECT FINAL OUTPUT:
FINAL_PROMPT: A majestic red fox sitting elegantly on a wooden fence at sunset, digital painting, dramatic golden hour lighting, highly detailed fur texture, 8k, cinematic composition, warm color palette, sharp focus

DO NOT include any text after the final prompt. The line should end immediately after the prompt content.

Remember: Be patient, thorough, and conversational. Your goal is to extract a detailed vision from the user through natural dialogue.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Model,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Model => "model",
        }
    }
}

impl fmt::Display for ChatRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn model(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Model,
            content: content.into(),
        }
    }
}

/// What the model sees before the new message. A fresh conversation is
/// seeded with an opening exchange that carries the standing instruction.
pub fn replay_history(past: &[ChatTurn]) -> Vec<ChatTurn> {
    if past.is_empty() {
        return vec![
            ChatTurn::user(OPENING_REQUEST),
            ChatTurn::model(format!("{PROMPT_REFINER_INSTRUCTION}\n\n{OPENING_GREETING}")),
        ];
    }
    past.to_vec()
}

/// The finished prompt, when a reply carries the marker at the start of
/// any line.
pub fn final_prompt(reply: &str) -> Option<String> {
    reply
        .lines()
        .filter_map(|line| line.trim_start().strip_prefix(FINAL_PROMPT_MARKER))
        .map(str::trim)
        .find(|prompt| !prompt.is_empty())
        .map(str::to_string)
}
