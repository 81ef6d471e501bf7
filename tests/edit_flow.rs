use std::path::PathBuf;

use clap::Parser;
use image::{Rgba, RgbaImage};

use graffiti_canvas::cli::{self, CliArgs, apply_script, parse_script};
use graffiti_canvas::io::encode_png;
use graffiti_canvas::{
    BrushSettings, DirectoryBridge, EditSession, EngineSettings, ImageSource, PointerEvent,
    SessionState, UploadCategory,
};

const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("graffiti-canvas-{}-{}", name, uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn is_reddish(px: &Rgba<u8>) -> bool {
    px[0] > 200 && px[1] < 70 && px[2] < 70
}

#[test]
fn draw_undo_redo_export() {
    let mut session = EditSession::default();
    session.load(ImageSource::Placeholder { width: 600, height: 600 }).unwrap();
    let (w, h) = session.edit_size().unwrap();
    assert_eq!((w, h), (480, 480));
    let blank = session.composite().unwrap();

    session.set_display_size(w as f32, h as f32);
    session
        .begin_stroke_with(PointerEvent::mouse(100.0, 120.0), BrushSettings::brush(RED, 10.0))
        .unwrap();
    for x in (110..=300).step_by(10) {
        session.continue_stroke(PointerEvent::mouse(x as f32, 120.0));
    }
    assert!(session.end_stroke());
    let drawn = session.composite().unwrap();
    assert_eq!(*drawn.get_pixel(200, 120), RED);

    assert!(session.undo());
    assert_eq!(session.composite().unwrap(), blank);

    assert!(session.redo());
    assert_eq!(session.composite().unwrap(), drawn);

    let blob = session.export_for_upload().unwrap();
    assert_eq!(session.state(), SessionState::Exported);
    let decoded = blob.decode().unwrap();
    assert!(decoded.width() <= 1200 && decoded.height() <= 1200);

    // same relative spot as (200, 120) on the editing surface
    let sx = 200 * decoded.width() / w;
    let sy = 120 * decoded.height() / h;
    assert!(is_reddish(decoded.get_pixel(sx, sy)), "{:?}", decoded.get_pixel(sx, sy));
    assert!(!is_reddish(decoded.get_pixel(sx, sy + 60)));
}

#[test]
fn script_replay_and_upload_from_a_photo() {
    let dir = scratch_dir("replay");
    let photo = RgbaImage::from_pixel(2400, 1600, Rgba([30, 90, 200, 255]));
    let photo_path = dir.join("photo.png");
    std::fs::write(&photo_path, encode_png(&photo).unwrap()).unwrap();

    let mut session = EditSession::new(EngineSettings::default());
    session.load(ImageSource::File(photo_path)).unwrap();
    assert_eq!(session.edit_size(), Some((480, 320)));

    // Points captured on a 240x160 display of the 480x320 surface.
    let ops = parse_script(
        r##"[
            {"op":"stroke","mode":"brush","color":"#ff0000","width":12,"points":[[20,40],[120,40]],"display":[240,160]},
            {"op":"stroke","mode":"brush","color":"#00ff00","width":12,"points":[[20,120],[120,120]],"display":[240,160]},
            {"op":"undo"}
        ]"##,
    )
    .unwrap();
    apply_script(&mut session, &ops).unwrap();

    let history = session.history().unwrap();
    assert_eq!((history.len(), history.index()), (3, 1));
    assert!(session.can_redo());

    let canvas = session.canvas().unwrap();
    assert_eq!(*canvas.annotation().pixels.get_pixel(140, 80), RED);
    assert_eq!(canvas.annotation().pixels.get_pixel(140, 240)[3], 0);

    let bucket = dir.join("bucket");
    let bridge = DirectoryBridge::new(&bucket, "https://cdn.example.com");
    let url = session.submit(&bridge, UploadCategory::Posts).unwrap();
    assert!(url.starts_with("https://cdn.example.com/uploads/") && url.ends_with(".jpg"));

    let key = url.trim_start_matches("https://cdn.example.com/");
    let stored = image::load_from_memory(&std::fs::read(bucket.join(key)).unwrap())
        .unwrap()
        .to_rgba8();
    assert_eq!(stored.dimensions(), (1200, 800));
    assert!(is_reddish(stored.get_pixel(350, 200)));
    assert!(!is_reddish(stored.get_pixel(350, 600)));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn stroke_before_load_is_rejected() {
    let mut session = EditSession::default();
    assert!(session.begin_stroke(PointerEvent::mouse(0.0, 0.0)).is_err());
    assert!(!session.undo());
    assert!(session.export_for_upload().is_err());
}

#[test]
fn crop_command_writes_a_circular_avatar() {
    let dir = scratch_dir("crop");
    let source = dir.join("face.png");
    std::fs::write(&source, encode_png(&RgbaImage::from_pixel(800, 600, RED)).unwrap()).unwrap();
    let config = dir.join("settings.cfg");
    EngineSettings::default().save_to(&config).unwrap();
    let out = dir.join("avatar.png");

    let args = CliArgs::try_parse_from([
        "graffiti-canvas",
        "crop",
        "--config",
        config.to_str().unwrap(),
        "-i",
        source.to_str().unwrap(),
        "--display-width",
        "400",
        "--region",
        "50,50,200,200",
        "--aspect",
        "1",
        "--circle",
        "-o",
        out.to_str().unwrap(),
    ])
    .unwrap();
    cli::execute(&args).unwrap();

    let avatar = image::open(&out).unwrap().to_rgba8();
    assert_eq!(avatar.dimensions(), (400, 400));
    assert_eq!(avatar.get_pixel(0, 0)[3], 0);
    assert_eq!(*avatar.get_pixel(200, 200), RED);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn crop_command_fails_on_bad_aspect() {
    let dir = scratch_dir("crop-bad");
    let source = dir.join("wide.png");
    std::fs::write(&source, encode_png(&RgbaImage::from_pixel(900, 300, RED)).unwrap()).unwrap();
    let config = dir.join("settings.cfg");
    EngineSettings::default().save_to(&config).unwrap();

    let args = CliArgs::try_parse_from([
        "graffiti-canvas",
        "crop",
        "--config",
        config.to_str().unwrap(),
        "-i",
        source.to_str().unwrap(),
        "--display-width",
        "900",
        "--region",
        "0,0,600,300",
        "--aspect",
        "3",
        "-o",
        dir.join("banner.jpg").to_str().unwrap(),
    ])
    .unwrap();
    let err = cli::execute(&args).unwrap_err();
    assert!(err.starts_with("crop failed"), "{}", err);
    assert!(!dir.join("banner.jpg").exists());

    let _ = std::fs::remove_dir_all(&dir);
}
