use crate::params::{AudioCodecMode, EncodingConfig, TRANSCODE_AUDIO_BITRATE, TRANSCODE_AUDIO_CODEC};

/// Name of the muxed video inside the engine namespace
pub const OUTPUT_NAME: &str = "output.mp4";

/// Command builder for the still-image + audio encode
pub struct CommandBuilder;

impl CommandBuilder {
    /// Create a new command builder
    pub fn new() -> Self {
        CommandBuilder
    }

    /// Build the encoder argv for looping one still over the audio track
    ///
    /// Generates arguments with:
    /// - Single-threaded decode (predictable memory on small devices)
    /// - Looped still input at the selected frame rate
    /// - Even-size padding so yuv420p accepts odd resampled dimensions
    /// - x264 tuned for still images with a huge GOP
    /// - Audio copied or transcoded per the selected mode
    pub fn build_encode_command(
        &self,
        image_name: &str,
        audio_name: &str,
        config: &EncodingConfig,
    ) -> Vec<String> {
        let rate = config.frame_rate.to_string();
        let mut args = Vec::new();

        args.push("-threads".to_string());
        args.push("1".to_string());

        // Still image input, looped at the output rate
        args.push("-loop".to_string());
        args.push("1".to_string());
        args.push("-framerate".to_string());
        args.push(rate.clone());
        args.push("-i".to_string());
        args.push(image_name.to_string());

        args.push("-i".to_string());
        args.push(audio_name.to_string());

        // Force output fps
        args.push("-r".to_string());
        args.push(rate);

        args.push("-vf".to_string());
        args.push("pad=ceil(iw/2)*2:ceil(ih/2)*2".to_string());

        args.push("-c:v".to_string());
        args.push("libx264".to_string());
        args.push("-preset".to_string());
        args.push("ultrafast".to_string());
        args.push("-crf".to_string());
        args.push("30".to_string());
        args.push("-tune".to_string());
        args.push("stillimage".to_string());

        match config.audio_codec_mode {
            AudioCodecMode::PassThrough => {
                args.push("-c:a".to_string());
                args.push("copy".to_string());
            }
            AudioCodecMode::Transcode => {
                args.push("-c:a".to_string());
                args.push(TRANSCODE_AUDIO_CODEC.to_string());
                args.push("-b:a".to_string());
                args.push(TRANSCODE_AUDIO_BITRATE.to_string());
            }
        }

        args.push("-pix_fmt".to_string());
        args.push("yuv420p".to_string());
        args.push("-shortest".to_string());
        args.push("-g".to_string());
        args.push("999999".to_string());

        args.push("-movflags".to_string());
        args.push("+faststart".to_string());

        args.push(OUTPUT_NAME.to_string());

        args
    }
}

impl Default for CommandBuilder {
    fn default() -> Self {
        Self::new()
    }
}
