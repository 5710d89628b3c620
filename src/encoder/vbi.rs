//! VBI (vertical blanking interval) ancillary capture via zvbi2raw

use crate::encoder::types::{sidecar_path, EncoderOptions};
use crate::recorder::process::{ProcessSpec, StdioMode};
use std::path::Path;

/// Ancillary capture writing raw VBI data to the `.vbi` sidecar
pub fn vbi_spec(options: &EncoderOptions, vbi_device: &str, output: &Path) -> ProcessSpec {
    let vbi_output = sidecar_path(output, "vbi");
    ProcessSpec::new("zvbi2raw", &options.zvbi2raw)
        .args(["-d", vbi_device, "-o"])
        .arg(vbi_output.to_string_lossy())
        .stdio(StdioMode::Piped, StdioMode::Piped, StdioMode::Piped)
        .output_path(vbi_output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vbi_args() {
        let spec = vbi_spec(&EncoderOptions::default(), "/dev/vbi0", Path::new("/tapes/a.mkv"));
        assert_eq!(spec.command_line(), "zvbi2raw -d /dev/vbi0 -o /tapes/a.vbi");
        assert_eq!(spec.output_path.as_deref(), Some(Path::new("/tapes/a.vbi")));
    }
}
