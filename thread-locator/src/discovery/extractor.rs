use std::collections::HashSet;

use imageboard_api::ThreadId;

use crate::page::ContentUnit;

/// Pulls candidate thread references out of the watched thread's posts.
///
/// Only posts made once the thread is near capacity count. On the existing
/// transcript that means walking back from the newest post until the image
/// count drops below the limit.
#[derive(Debug, Clone, Copy)]
pub struct LinkExtractor {
    current: ThreadId,
    image_limit: u32,
}

impl LinkExtractor {
    pub fn new(current: ThreadId, image_limit: u32) -> Self {
        Self {
            current,
            image_limit,
        }
    }

    /// References from the tail of `transcript` (oldest first) that was
    /// posted at or above the image limit. `image_count` is the thread's
    /// image count including every unit in `transcript`.
    pub fn from_transcript(&self, transcript: &[ContentUnit], image_count: u32) -> Vec<ThreadId> {
        self.walk_back(transcript, image_count).0
    }

    /// References of a single newly appended unit.
    pub fn from_unit(&self, unit: &ContentUnit) -> Vec<ThreadId> {
        if !unit.is_post {
            return Vec::new();
        }
        let mut seen = HashSet::new();
        unit.thread_refs
            .iter()
            .copied()
            .filter(|id| *id != self.current && seen.insert(*id))
            .collect()
    }

    /// Returns the references and the index of the oldest unit examined
    /// (`transcript.len()` if none was).
    fn walk_back(&self, transcript: &[ContentUnit], image_count: u32) -> (Vec<ThreadId>, usize) {
        let mut counter = image_count;
        let mut seen = HashSet::new();
        let mut refs = Vec::new();
        let mut oldest = transcript.len();

        for (index, unit) in transcript.iter().enumerate().rev() {
            if counter < self.image_limit {
                break;
            }
            oldest = index;
            if !unit.is_post {
                continue;
            }

            refs.extend(
                unit.thread_refs
                    .iter()
                    .copied()
                    .filter(|id| *id != self.current && seen.insert(*id)),
            );
            if unit.has_image() {
                counter = counter.saturating_sub(1);
            }
        }

        (refs, oldest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const CURRENT: u64 = 1000;

    fn unit(image: bool, refs: &[u64]) -> ContentUnit {
        ContentUnit {
            post_no: 0,
            is_post: true,
            image_hash: image.then(|| "X".to_string()),
            thread_refs: refs.iter().copied().map(ThreadId::new).collect(),
        }
    }

    fn ids(raw: &[u64]) -> Vec<ThreadId> {
        raw.iter().copied().map(ThreadId::new).collect()
    }

    #[test]
    fn test_walk_stops_below_limit() {
        let extractor = LinkExtractor::new(ThreadId::new(CURRENT), 3);
        // images: 4 in total, the newest two push the count to 3 and 4.
        let transcript = vec![
            unit(true, &[1]),
            unit(true, &[2]),
            unit(true, &[3]),
            unit(false, &[4]),
            unit(true, &[5]),
        ];

        // counter 4 -> unit 5 (img, 3) -> unit 4 (no img, 3) -> unit 3 (img, 2) -> stop
        assert_eq!(extractor.from_transcript(&transcript, 4), ids(&[5, 4, 3]));
    }

    #[test]
    fn test_walk_below_limit_is_empty() {
        let extractor = LinkExtractor::new(ThreadId::new(CURRENT), 230);
        let transcript = vec![unit(true, &[1]), unit(true, &[2])];
        assert!(extractor.from_transcript(&transcript, 229).is_empty());
    }

    #[test]
    fn test_walk_excludes_self_and_duplicates() {
        let extractor = LinkExtractor::new(ThreadId::new(CURRENT), 1);
        let transcript = vec![unit(false, &[7, CURRENT]), unit(false, &[8, 7, 7])];
        assert_eq!(extractor.from_transcript(&transcript, 5), ids(&[8, 7]));
    }

    #[test]
    fn test_walk_skips_non_posts() {
        let extractor = LinkExtractor::new(ThreadId::new(CURRENT), 1);
        let mut notice = unit(true, &[9]);
        notice.is_post = false;
        let transcript = vec![unit(true, &[1]), notice, unit(true, &[2])];

        // The notice neither contributes references nor consumes an image.
        assert_eq!(extractor.from_transcript(&transcript, 2), ids(&[2, 1]));
    }

    #[test]
    fn test_from_unit() {
        let extractor = LinkExtractor::new(ThreadId::new(CURRENT), 230);
        assert_eq!(extractor.from_unit(&unit(true, &[555, CURRENT, 555])), ids(&[555]));

        let mut notice = unit(true, &[555]);
        notice.is_post = false;
        assert!(extractor.from_unit(&notice).is_empty());
    }

    proptest! {
        #[test]
        fn prop_walk_never_passes_cutoff(
            images in prop::collection::vec(any::<bool>(), 0..60),
            limit in 0u32..40,
        ) {
            let transcript: Vec<ContentUnit> = images
                .iter()
                .enumerate()
                .map(|(i, img)| unit(*img, &[i as u64 + 1]))
                .collect();
            let image_count = images.iter().filter(|i| **i).count() as u32;
            let extractor = LinkExtractor::new(ThreadId::new(CURRENT), limit);

            let (refs, oldest) = extractor.walk_back(&transcript, image_count);

            // Running count just before the oldest examined unit was still at
            // or above the limit, so that unit is at most the one that crossed.
            let images_from_oldest = images[oldest..].iter().filter(|i| **i).count() as u32;
            if oldest < transcript.len() {
                prop_assert!(image_count - (images_from_oldest - u32::from(images[oldest])) >= limit);
            }
            // Every unit newer than the cutoff was examined.
            prop_assert_eq!(refs.len(), transcript.len() - oldest);
            if oldest > 0 {
                prop_assert!(image_count - images_from_oldest < limit);
            }
        }
    }
}
