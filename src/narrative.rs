//! Story text generation through a local Ollama model.
//!
//! Produces the narrative that the narration pipeline later speaks.
//! Callers fall back to `FALLBACK_STORY` when generation fails.

use std::sync::LazyLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::config::NarrativeConfig;
use crate::error::{NarrationError, Result};

/// Opening formula every generated story starts with.
pub const OPENING_FORMULA: &str = "एक बार की बात है";

pub const DEFAULT_PERSONA: &str = "आप एक प्यारी और अनुभवी दादी हैं जो बच्चों को कहानियां सुनाती हैं। \
सरल, सुंदर हिंदी का प्रयोग करें। \"अरे वाह!\", \"ओह हो!\", \"देखो तो!\" जैसे भाव भरे शब्द इस्तेमाल करें। \
हर कहानी \"एक बार की बात है\" से शुरू हो और अंत में एक अच्छी सीख हो।";

pub const FALLBACK_STORY: &str = "अरे बेटा, दादी को कहानी बनाने में थोड़ी सी समस्या हो रही है।\n\n\
कोई बात नहीं, थोड़ा सा इंतज़ार करके दोबारा कोशिश करते हैं। दादी आपके लिए बहुत सुंदर कहानी लेकर आएंगी!";

pub const FALLBACK_TITLE: &str = "दादी की प्यारी कहानी";

/// How a story addresses the listener when no name is given.
pub const DEFAULT_LISTENER: &str = "बेटा";

// Title is the sentence after the danda-terminated opening sentence.
static TITLE_AFTER_OPENING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"एक बार की बात है[^।]*।\s*([^।\n]+)").expect("title regex")
});

/// Pick a display title for a generated story.
pub fn extract_title(text: &str, default: &str) -> String {
    let first_line = text
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("");

    if first_line.contains(OPENING_FORMULA) {
        return TITLE_AFTER_OPENING
            .captures(text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| default.to_string());
    }

    if !first_line.is_empty() && first_line.chars().count() < 60 {
        first_line.to_string()
    } else {
        default.to_string()
    }
}

/// Story themes offered to the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StoryCategory {
    RajaRani,
    Pariyon,
    Jungle,
    Janwar,
    Mystery,
    #[default]
    Moral,
    Festival,
    Bedtime,
    Custom,
}

impl StoryCategory {
    pub const ALL: [StoryCategory; 9] = [
        Self::RajaRani,
        Self::Pariyon,
        Self::Jungle,
        Self::Janwar,
        Self::Mystery,
        Self::Moral,
        Self::Festival,
        Self::Bedtime,
        Self::Custom,
    ];

    pub fn slug(self) -> &'static str {
        match self {
            Self::RajaRani => "raja-rani",
            Self::Pariyon => "pariyon",
            Self::Jungle => "jungle",
            Self::Janwar => "janwar",
            Self::Mystery => "mystery",
            Self::Moral => "moral",
            Self::Festival => "festival",
            Self::Bedtime => "bedtime",
            Self::Custom => "custom",
        }
    }

    /// Display name shown to the listener.
    pub fn display_name(self) -> &'static str {
        match self {
            Self::RajaRani => "राजा रानी की कहानी",
            Self::Pariyon => "परियों की कहानी",
            Self::Jungle => "जंगल एडवेंचर",
            Self::Janwar => "जानवरों की मस्ती",
            Self::Mystery => "रहस्यमय कहानियां",
            Self::Moral => "नैतिक कहानियां",
            Self::Festival => "त्योहार स्पेशल",
            Self::Bedtime => "सोने की कहानियां",
            Self::Custom => "आपकी खास कहानी",
        }
    }

    /// Title used when none can be read from the story itself.
    pub fn default_title(self, name: &str) -> String {
        let name = name.trim();
        if name.is_empty() {
            self.display_name().to_string()
        } else {
            format!("{} - {name}", self.display_name())
        }
    }

    /// Prompt for a story in this category starring `name`.
    ///
    /// `Custom` needs themes; without them it behaves like `Moral`.
    pub fn prompt_for(self, name: &str, themes: &str) -> String {
        let name = match name.trim() {
            "" => DEFAULT_LISTENER,
            n => n,
        };
        let themes = themes.trim();
        match self {
            Self::Custom if !themes.is_empty() => format!(
                "मेरे प्यारे बच्चे {name} के लिए एक लंबी और मज़ेदार कहानी सुनाएं जिसमें ये चीज़ें हों: {themes}। \
                 {name} इस कहानी का मुख्य किरदार है। कहानी में रोमांच, दोस्ती, खुशी और थोड़ा सा रहस्य हो। \
                 कहानी को विस्तार से बताएं और अंत में एक प्यारी सी सीख भी दें।"
            ),
            Self::RajaRani => format!(
                "मेरे राजकुमार/राजकुमारी {name} के लिए एक शानदार और लंबी राजा-रानी की कहानी सुनाएं। \
                 इसमें एक सुंदर महल, जादुई चीज़ें, बहादुरी, और दयालुता की सीख हो। कहानी में संवाद और रोमांच भी हो।"
            ),
            Self::Pariyon => format!(
                "मेरे प्यारे {name} के लिए परियों की एक जादुई और लंबी कहानी सुनाएं। \
                 इसमें रंग-बिरंगी परियां, जादू, उड़ना, और सच्ची दोस्ती की सीख हो। कहानी में जादुई जंगल और खूबसूरत महल भी हो।"
            ),
            Self::Jungle => format!(
                "मेरे बहादुर {name} के लिए जंगल की एक रोमांचक और लंबी कहानी सुनाएं। \
                 इसमें जंगली जानवर, साहसिक यात्रा, छुपे हुए खजाने, और प्रकृति से प्रेम की सीख हो।"
            ),
            Self::Janwar => format!(
                "मेरे प्यारे {name} के लिए जानवरों की एक मज़ेदार और लंबी कहानी सुनाएं। \
                 इसमें प्यारे जानवर, उनकी शरारतें, दोस्ती, और दया-करुणा की सीख हो।"
            ),
            Self::Mystery => format!(
                "मेरे होशियार {name} के लिए एक रहस्यमय और दिलचस्प कहानी सुनाएं। \
                 इसमें एक छोटा सा रहस्य, खोज, सुराग, और समझदारी की सीख हो। कहानी डरावनी नहीं बल्कि रोचक हो।"
            ),
            Self::Festival => format!(
                "मेरे खुशमिज़ाज {name} के लिए त्योहार की एक रंगीन और लंबी कहानी सुनाएं। \
                 इसमें खुशी, उत्सव, रंग, मिठाई, और साझा करने की सीख हो।"
            ),
            Self::Bedtime => format!(
                "मेरे प्यारे {name} के लिए सोने के समय की एक शांत और लंबी कहानी सुनाएं। \
                 इसमें चांद, तारे, मीठे सपने, और प्रेम की गर्मजोशी हो।"
            ),
            Self::Moral | Self::Custom => format!(
                "मेरे अच्छे बच्चे {name} के लिए एक नैतिक और लंबी कहानी सुनाएं \
                 जो ईमानदारी, सच्चाई, या अच्छे व्यवहार की सीख देती हो।"
            ),
        }
    }
}

impl std::str::FromStr for StoryCategory {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|c| c.slug() == wanted)
            .ok_or_else(|| {
                let known: Vec<&str> = Self::ALL.iter().map(|c| c.slug()).collect();
                format!("unknown story category '{s}' (expected one of: {})", known.join(", "))
            })
    }
}

#[async_trait]
pub trait NarrativeSource: Send + Sync {
    /// Generate story text for `prompt`. `system` overrides the persona.
    async fn generate(&self, prompt: &str, system: Option<&str>) -> Result<String>;
}

pub struct OllamaNarrator {
    model: String,
    host: String,
    persona: String,
    client: Client,
}

impl OllamaNarrator {
    pub fn new(config: &NarrativeConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        let persona = if config.persona.trim().is_empty() {
            DEFAULT_PERSONA.to_string()
        } else {
            config.persona.clone()
        };

        Ok(Self {
            model: config.model.clone(),
            host: config.host.trim_end_matches('/').to_string(),
            persona,
            client,
        })
    }
}

#[async_trait]
impl NarrativeSource for OllamaNarrator {
    async fn generate(&self, prompt: &str, system: Option<&str>) -> Result<String> {
        let t_start = Instant::now();
        let persona = system.filter(|s| !s.trim().is_empty()).unwrap_or(&self.persona);

        let body = json!({
            "model": self.model,
            "prompt": format!("{persona}\n\n{prompt}"),
            "stream": false,
            "options": {
                "temperature": 0.8
            }
        });

        let url = format!("{}/api/generate", self.host);
        let resp = self.client.post(&url).json(&body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!("Ollama narrator returned status {status}");
            return Err(NarrationError::Provider {
                status: status.as_u16(),
                body,
            });
        }

        let data: serde_json::Value = resp.json().await?;
        let story = data["response"].as_str().unwrap_or("").trim().to_string();
        if story.is_empty() {
            return Err(NarrationError::MalformedResponse(
                "Ollama returned an empty story".into(),
            ));
        }

        info!(
            "Generated story: {} chars ({:.0}ms)",
            story.chars().count(),
            t_start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(story)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_follows_opening_sentence() {
        let text = "एक बार की बात है, एक छोटे से गाँव में। चतुर लोमड़ी और कौआ। फिर क्या हुआ?";
        assert_eq!(extract_title(text, "default"), "चतुर लोमड़ी और कौआ");
    }

    #[test]
    fn opening_without_second_sentence_uses_default() {
        let text = "एक बार की बात है, एक राजा था";
        assert_eq!(extract_title(text, "default"), "default");
    }

    #[test]
    fn short_first_line_is_title() {
        let text = "\nसोने की चिड़िया\n\nबहुत पहले की बात है।";
        assert_eq!(extract_title(text, "default"), "सोने की चिड़िया");
    }

    #[test]
    fn long_first_line_uses_default() {
        let text = "a".repeat(80);
        assert_eq!(extract_title(&text, "default"), "default");
        assert_eq!(extract_title("", "default"), "default");
    }

    #[test]
    fn category_prompts_carry_the_name() {
        let prompt = StoryCategory::Jungle.prompt_for("आरव", "");
        assert!(prompt.starts_with("मेरे बहादुर आरव के लिए जंगल"));
        assert!(!prompt.contains('\\'));
        assert!(!prompt.contains("  "));

        let unnamed = StoryCategory::Bedtime.prompt_for("", "");
        assert!(unnamed.starts_with("मेरे प्यारे बेटा के लिए"));
    }

    #[test]
    fn custom_without_themes_is_a_moral_story() {
        let custom = StoryCategory::Custom.prompt_for("मीरा", "  ");
        assert_eq!(custom, StoryCategory::Moral.prompt_for("मीरा", ""));

        let themed = StoryCategory::Custom.prompt_for("मीरा", "डायनासोर, अंतरिक्ष");
        assert!(themed.contains("ये चीज़ें हों: डायनासोर, अंतरिक्ष।"));
        assert!(themed.contains("मीरा इस कहानी का मुख्य किरदार है।"));
    }

    #[test]
    fn default_title_uses_category_and_name() {
        assert_eq!(
            StoryCategory::Pariyon.default_title("मीरा"),
            "परियों की कहानी - मीरा"
        );
        assert_eq!(StoryCategory::Bedtime.default_title(" "), "सोने की कहानियां");

        let story = "बहुत लंबी पहली पंक्ति ".repeat(5);
        assert_eq!(
            extract_title(&story, &StoryCategory::Pariyon.default_title("मीरा")),
            "परियों की कहानी - मीरा"
        );
    }

    #[test]
    fn category_parses_from_slug() {
        assert_eq!("raja-rani".parse::<StoryCategory>(), Ok(StoryCategory::RajaRani));
        assert_eq!(" Bedtime ".parse::<StoryCategory>(), Ok(StoryCategory::Bedtime));
        assert!("pirates".parse::<StoryCategory>().is_err());
        assert_eq!(StoryCategory::default(), StoryCategory::Moral);
        for c in StoryCategory::ALL {
            let json = serde_json::to_string(&c).unwrap();
            assert_eq!(json, format!("\"{}\"", c.slug()));
        }
    }

    #[test]
    fn empty_persona_uses_builtin() {
        let narrator = OllamaNarrator::new(&NarrativeConfig::default()).unwrap();
        assert_eq!(narrator.persona, DEFAULT_PERSONA);
        assert!(DEFAULT_PERSONA.contains(OPENING_FORMULA));
    }
}
