//! FFmpeg invocation builders.

use std::fmt;
use std::path::Path;

use crate::models::payload::{MergeJob, ProcessJob};

/// A program plus its argv, spawned without a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.to_string_lossy())
    }
}

/// Audit form: the program and arguments, arguments containing whitespace quoted.
impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.chars().any(char::is_whitespace) {
                write!(f, " \"{arg}\"")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// `<tool> -i <input> <fragment...> <output>`
pub fn transcode_invocation(tool: &str, job: &ProcessJob) -> Invocation {
    Invocation::new(tool)
        .arg("-i")
        .path_arg(&job.input_path)
        .args(split_fragment(&job.command_fragment))
        .path_arg(&job.output_path)
}

/// Loop the video over the full audio track, stopping at the shortest stream.
pub fn merge_invocation(tool: &str, job: &MergeJob) -> Invocation {
    Invocation::new(tool)
        .args(["-stream_loop", "-1", "-i"])
        .path_arg(&job.video_path)
        .arg("-i")
        .path_arg(&job.audio_path)
        .args(["-shortest", "-map", "0:v:0", "-map", "1:a:0", "-c:v", "libx264", "-c:a", "aac"])
        .path_arg(&job.output_path)
}

/// Split a validated fragment into arguments.
///
/// Whitespace separates arguments; single or double quotes group text and are
/// removed. Fragments reaching here contain no backslashes, so there is no
/// escape handling.
pub fn split_fragment(fragment: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_arg = false;
    let mut quote: Option<char> = None;

    for ch in fragment.chars() {
        match quote {
            Some(q) if ch == q => quote = None,
            Some(_) => current.push(ch),
            None if ch == '"' || ch == '\'' => {
                quote = Some(ch);
                in_arg = true;
            }
            None if ch.is_whitespace() => {
                if in_arg {
                    args.push(std::mem::take(&mut current));
                    in_arg = false;
                }
            }
            None => {
                current.push(ch);
                in_arg = true;
            }
        }
    }

    if in_arg {
        args.push(current);
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_split_keeps_quoted_filter_whole() {
        assert_eq!(
            split_fragment(r#"-filter:v "setpts=3.0*PTS" -an"#),
            vec!["-filter:v", "setpts=3.0*PTS", "-an"]
        );
    }

    #[test]
    fn test_split_quoted_spaces_and_single_quotes() {
        assert_eq!(
            split_fragment(r#"-filter:v "drawtext=text='hello world'"  -r 30"#),
            vec!["-filter:v", "drawtext=text='hello world'", "-r", "30"]
        );
        assert_eq!(split_fragment("-metadata title=''"), vec!["-metadata", "title="]);
    }

    #[test]
    fn test_split_empty_quoted_argument() {
        assert_eq!(split_fragment(r#"-x """#), vec!["-x", ""]);
        assert!(split_fragment("   ").is_empty());
    }

    #[test]
    fn test_transcode_invocation_shape() {
        let job = ProcessJob {
            id: "abc".to_string(),
            input_path: PathBuf::from("/tmp/abc.mpg"),
            output_path: PathBuf::from("/tmp/abc_output.mp4"),
            command_fragment: r#"-filter:v "setpts=3.0*PTS""#.to_string(),
        };

        let invocation = transcode_invocation("ffmpeg", &job);
        assert_eq!(invocation.program, "ffmpeg");
        assert_eq!(
            invocation.args,
            vec!["-i", "/tmp/abc.mpg", "-filter:v", "setpts=3.0*PTS", "/tmp/abc_output.mp4"]
        );
        assert_eq!(
            invocation.to_string(),
            "ffmpeg -i /tmp/abc.mpg -filter:v setpts=3.0*PTS /tmp/abc_output.mp4"
        );
    }

    #[test]
    fn test_merge_invocation_shape() {
        let job = MergeJob {
            id: "test-uuid".to_string(),
            video_path: PathBuf::from("/tmp/test-uuid_video.mp4"),
            audio_path: PathBuf::from("/tmp/test-uuid_audio.mp3"),
            output_path: PathBuf::from("/tmp/test-uuid_output.mp4"),
        };

        assert_eq!(
            merge_invocation("ffmpeg", &job).to_string(),
            "ffmpeg -stream_loop -1 -i /tmp/test-uuid_video.mp4 -i /tmp/test-uuid_audio.mp3 \
             -shortest -map 0:v:0 -map 1:a:0 -c:v libx264 -c:a aac /tmp/test-uuid_output.mp4"
        );
    }

    #[test]
    fn test_display_quotes_whitespace_arguments() {
        let invocation = Invocation::new("ffmpeg").args(["-vf", "drawtext=text='a b'"]);
        assert_eq!(invocation.to_string(), "ffmpeg -vf \"drawtext=text='a b'\"");
    }
}
