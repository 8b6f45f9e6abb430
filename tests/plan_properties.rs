//! Randomised checks of the planner's language and determinism guarantees.

use media_fixer::inventory::{MediaInventory, StreamDescriptor, StreamKind};
use media_fixer::plan::{build_plan, DropReason, StreamAction};
use media_fixer::policy::{languages_match, CodecChoice, LanguageFilter, Policy};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;

const LANGUAGES: &[Option<&str>] = &[None, Some("eng"), Some("en"), Some("jpn"), Some("fre"), Some("fra"), Some("ger")];
const VIDEO: &[&str] = &["h264", "hevc", "mpeg4", "av1", "vp9"];
const AUDIO: &[&str] = &["aac", "ac3", "eac3", "dts", "opus", "flac"];
const SUBS: &[&str] = &["subrip", "ass", "mov_text", "hdmv_pgs_subtitle", "dvd_subtitle"];
const CONTAINERS: &[&str] = &["mkv", "mp4", "avi", "webm", "mov"];

fn random_inventory(rng: &mut StdRng) -> MediaInventory {
    let count = rng.gen_range(1..=8);
    let streams = (0..count)
        .map(|index| {
            let kind = *[StreamKind::Video, StreamKind::Audio, StreamKind::Subtitle]
                .choose(rng)
                .unwrap();
            let codec = match kind {
                StreamKind::Video => VIDEO.choose(rng),
                StreamKind::Audio => AUDIO.choose(rng),
                StreamKind::Subtitle => SUBS.choose(rng),
            }
            .unwrap()
            .to_string();
            StreamDescriptor {
                index,
                kind,
                codec,
                language: LANGUAGES.choose(rng).unwrap().map(str::to_string),
                channels: (kind == StreamKind::Audio)
                    .then(|| rng.gen_range(1..=8))
                    .filter(|_| rng.gen_bool(0.8)),
            }
        })
        .collect();
    let container = CONTAINERS.choose(rng).unwrap().to_string();
    MediaInventory {
        path: PathBuf::from(format!("/lib/item.{}", container)),
        container,
        format_name: None,
        streams,
        ignored_streams: 0,
    }
}

fn random_choice(rng: &mut StdRng, names: &[&str]) -> CodecChoice {
    if rng.gen_bool(0.4) {
        CodecChoice::Copy
    } else {
        CodecChoice::Target(names.choose(rng).unwrap().to_string())
    }
}

fn random_policy(rng: &mut StdRng) -> Policy {
    Policy {
        container: rng
            .gen_bool(0.5)
            .then(|| CONTAINERS.choose(rng).unwrap().to_string()),
        video_codec: random_choice(rng, &["libx265", "libx264", "hevc", "av1"]),
        audio_codec: random_choice(rng, &["aac", "opus", "ac3"]),
        subtitle_codec: random_choice(rng, &["srt", "mov_text", "ass"]),
        quality: rng.gen_bool(0.5).then(|| rng.gen_range(15..35)),
        audio_channels: rng.gen_bool(0.3).then(|| rng.gen_range(1..=6)),
        languages: LanguageFilter {
            strip: rng.gen_bool(0.7),
            audio: ["eng", "en", "jpn"].choose(rng).unwrap().to_string(),
            subtitle: ["eng", "fra", "ger"].choose(rng).unwrap().to_string(),
        },
        ..Policy::default()
    }
}

#[test]
fn strip_mode_drops_exactly_known_foreign_languages() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    for _ in 0..500 {
        let inventory = random_inventory(&mut rng);
        let mut policy = random_policy(&mut rng);
        policy.languages.strip = true;

        let Ok(plan) = build_plan(&inventory, &policy) else {
            continue;
        };
        for planned in &plan.streams {
            let wanted = match planned.stream.kind {
                StreamKind::Audio => &policy.languages.audio,
                StreamKind::Subtitle => &policy.languages.subtitle,
                StreamKind::Video => {
                    assert!(planned.action.is_retained(), "video is never dropped");
                    continue;
                }
            };
            let foreign = planned
                .stream
                .language
                .as_deref()
                .is_some_and(|lang| !languages_match(lang, wanted));
            let language_drop = matches!(
                planned.action,
                StreamAction::Drop {
                    reason: DropReason::Language
                }
            );
            assert_eq!(
                foreign, language_drop,
                "stream {:?} under {:?}",
                planned.stream, policy.languages
            );
        }
    }
}

#[test]
fn plans_are_deterministic_and_ordered() {
    let mut rng = StdRng::seed_from_u64(42);
    for _ in 0..500 {
        let inventory = random_inventory(&mut rng);
        let policy = random_policy(&mut rng);

        let first = build_plan(&inventory, &policy);
        let second = build_plan(&inventory.clone(), &policy.clone());
        assert_eq!(first, second);

        if let Ok(plan) = first {
            let indexes: Vec<u32> = plan.streams.iter().map(|p| p.stream.index).collect();
            let original: Vec<u32> = inventory.streams.iter().map(|s| s.index).collect();
            assert_eq!(indexes, original);
            assert!(
                plan.retained_count(StreamKind::Video) + plan.retained_count(StreamKind::Audio) > 0
            );
        }
    }
}

#[test]
fn subtitles_written_into_a_new_container_are_ones_it_can_hold() {
    let mut rng = StdRng::seed_from_u64(0x5ab7);
    for _ in 0..500 {
        let inventory = random_inventory(&mut rng);
        let policy = random_policy(&mut rng);

        let Ok(plan) = build_plan(&inventory, &policy) else {
            continue;
        };
        if !plan.changes_container() {
            continue;
        }
        let required = match plan.container.as_str() {
            "mp4" | "mov" => "mov_text",
            "webm" => "webvtt",
            _ => continue,
        };
        for planned in plan.retained() {
            if planned.stream.kind != StreamKind::Subtitle {
                continue;
            }
            let written = match &planned.action {
                StreamAction::Reencode { codec, .. } => codec.as_str(),
                _ => planned.stream.codec.as_str(),
            };
            assert_eq!(
                written, required,
                "stream {:?} into {} under {:?}",
                planned.stream, plan.container, policy.subtitle_codec
            );
        }
    }
}
