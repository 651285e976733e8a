use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::trace;

use super::element::VideoElement;

/// Play while the element is visible, pause otherwise. The task ends when the
/// element's visibility channel closes.
pub fn observe(video: Arc<dyn VideoElement>) -> JoinHandle<()> {
    let mut visible = video.viewport();
    tokio::spawn(async move {
        let mut last = None;
        loop {
            let now = *visible.borrow_and_update();
            if last != Some(now) {
                trace!(visible = now, "Viewport visibility changed");
                if now {
                    video.play();
                } else {
                    video.pause();
                }
                last = Some(now);
            }
            if visible.changed().await.is_err() {
                break;
            }
        }
    })
}
