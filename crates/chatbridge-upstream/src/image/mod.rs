//! Image generation jobs announced inside the text stream.

mod poller;
mod store;

use std::time::Duration;

use async_trait::async_trait;
use chatbridge_auth::SessionCredential;
use once_cell::sync::Lazy;
use regex::Regex;

pub use poller::{ImagePoller, PollSettings};
pub use store::{FsImageStore, HostedImageStore, ImageStore};

/// Marker the upstream puts in a text frame when it starts an image job.
pub const IMAGE_MARKER: &str = "<image_generation>";

static JOB_ATTRIBUTES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"jobId='([^']+)' prompt='([^']+)' negative='([^']*)'")
        .expect("job attribute pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageJob {
    pub job_id: String,
    pub prompt: String,
    pub negative: String,
}

impl ImageJob {
    /// Extract the job attributes from a marker frame.
    pub fn from_marker(text: &str) -> Option<Self> {
        let caps = JOB_ATTRIBUTES.captures(text)?;
        Some(Self {
            job_id: caps[1].to_string(),
            prompt: caps[2].to_string(),
            negative: caps[3].to_string(),
        })
    }

    /// First `-` separated segment of the job id.
    pub fn short_id(&self) -> &str {
        self.job_id.split('-').next().unwrap_or(&self.job_id)
    }
}

/// Where the generated image ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageRef {
    /// Re-hosted through an [`ImageStore`].
    Hosted(String),
    /// `data:` URL carrying the image itself.
    Inline(String),
    /// Absolute URL reported by the upstream.
    Absolute(String),
    /// Upstream-relative path resolved against the origin.
    Resolved(String),
    /// Synthesized from the job id when the upstream reported nothing usable.
    Fallback(String),
}

impl ImageRef {
    pub fn url(&self) -> &str {
        match self {
            Self::Hosted(u)
            | Self::Inline(u)
            | Self::Absolute(u)
            | Self::Resolved(u)
            | Self::Fallback(u) => u,
        }
    }
}

/// Waits for an image job to finish. At most one call per chat session.
#[async_trait]
pub trait ImageJobPoller: Send + Sync {
    async fn poll(&self, job: &ImageJob, credential: &SessionCredential) -> Option<ImageRef>;
}

/// Opens the reasoning block shown while the image is generated.
pub fn preamble_message(job: &ImageJob) -> String {
    format!("<think>\n🎨 Generating image...\n\nPrompt: {}\n", job.prompt)
}

/// Closes the reasoning block and shows the image or a failure notice.
pub fn completion_message(elapsed: Duration, image: Option<&ImageRef>) -> String {
    let mut msg = format!(
        "\n🤔 Thinking for {:.1}s...\n</think>\n\n",
        elapsed.as_secs_f64()
    );
    match image {
        Some(image) => msg.push_str(&format!("![Generated Image]({})", image.url())),
        None => msg.push_str("*Image generation or upload failed.*\n"),
    }
    msg
}
