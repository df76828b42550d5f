pub mod dial;
pub mod serve;

use pushmux::FramedCodec;
use tokio_util::codec::LinesCodec;

/// Demo wire format: newline-delimited lines. Responses start with `~`,
/// anything else the server sends is a push.
pub type DemoCodec = FramedCodec<LinesCodec, fn(&String) -> bool>;

fn is_push(line: &String) -> bool {
  !line.starts_with('~')
}

pub fn demo_codec() -> DemoCodec {
  FramedCodec::with_push_classifier(LinesCodec::new(), is_push as fn(&String) -> bool)
}
