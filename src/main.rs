use anyhow::{bail, Context, Result};
use std::path::Path;
use std::sync::Arc;
use story2comic::core::config::Config;
use story2comic::core::io::{NativeStorage, Storage};
use story2comic::core::state::{Chapter, ProjectState};
use story2comic::services::analysis::{analyze_story, generate_reference_images};
use story2comic::services::artist::PanelArtist;
use story2comic::services::executor::Executor;
use story2comic::services::gemini::GeminiBackend;
use story2comic::services::keys::KeyPool;
use story2comic::services::observer::ProgressBarObserver;
use story2comic::services::pipeline::{ChapterRequest, Pipeline};
use story2comic::services::project::{
    export_chapter, ChapterSnapshotter, JsonProjectStore, ProjectStore,
};
use tokio_util::sync::CancellationToken;

struct Args {
    story: Option<String>,
    chapter: Option<usize>,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        story: None,
        chapter: None,
    };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--chapter" => {
                let value = iter.next().context("--chapter needs a number")?;
                let n: usize = value.parse().context("--chapter needs a number")?;
                if n == 0 {
                    bail!("chapters are numbered from 1");
                }
                args.chapter = Some(n);
            }
            other if args.story.is_none() => args.story = Some(other.to_string()),
            other => bail!("Unexpected argument: {}", other),
        }
    }
    Ok(args)
}

fn chapter_done(chapter: &Chapter) -> bool {
    !chapter.panels.is_empty()
        && chapter
            .panels
            .iter()
            .all(|p| p.image.is_some() && !p.generation_failed)
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let args = parse_args()?;
    let config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            eprintln!("Please ensure 'config.yml' exists with a backend.api_key.");
            return Err(e);
        }
    };
    config.ensure_directories()?;

    let pool = KeyPool::from_config(&config.backend)?;
    println!("Using {} API key(s)", pool.size());
    let backend = Arc::new(GeminiBackend::new(&config.backend)?);
    let artist = PanelArtist::new(Executor::new(Arc::new(pool)), backend);

    let storage: Arc<dyn Storage> = Arc::new(NativeStorage::new());
    let story_path = args
        .story
        .unwrap_or_else(|| format!("{}/story.txt", config.input_folder));
    let story = String::from_utf8(
        storage
            .read(&story_path)
            .await
            .with_context(|| format!("Failed to read {}", story_path))?,
    )?;
    let stem = Path::new(&story_path)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "story".to_string());

    let build_dir = Path::new(&config.build_folder).join(&stem);
    let store = Arc::new(JsonProjectStore::new(
        storage.clone(),
        &build_dir.to_string_lossy(),
    ));

    // Resume a previous run of the same story if there is one.
    let mut project = match store.load().await? {
        Some(project) if project.story == story => {
            println!("Resuming project from {}", store.path());
            project
        }
        _ => {
            println!("Analyzing story...");
            let analysis = analyze_story(&artist, &story).await?;
            ProjectState {
                title: stem.clone(),
                story: story.clone(),
                characters: analysis.characters,
                scenery: analysis.scenery,
                chapters: analysis.chapters,
            }
        }
    };

    println!("Preparing reference images...");
    generate_reference_images(
        &artist,
        &mut project.characters,
        &mut project.scenery,
        &config.style,
        config.concurrency,
    )
    .await;
    store.save(&project).await?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                println!("Cancelling after the current panel...");
                cancel.cancel();
            }
        });
    }

    let selected: Vec<usize> = match args.chapter {
        Some(n) if n > project.chapters.len() => {
            bail!("Story has only {} chapters", project.chapters.len())
        }
        Some(n) => vec![n - 1],
        None => (0..project.chapters.len()).collect(),
    };

    for index in selected {
        if cancel.is_cancelled() {
            break;
        }
        let chapter = project.chapters[index].clone();
        if args.chapter.is_none() && chapter_done(&chapter) {
            println!("Skipping completed chapter: {}", chapter.title);
            continue;
        }

        println!("Generating chapter {}: {}", index + 1, chapter.title);
        let observer = Arc::new(ProgressBarObserver::new(&chapter.title));
        let pipeline = Pipeline::new(artist.clone(), observer.clone()).with_snapshots(
            ChapterSnapshotter::new(store.clone(), project.clone(), index),
        );

        let request = ChapterRequest {
            chapter_text: &chapter.text,
            characters: &project.characters,
            scenery: &project.scenery,
            style: &config.style,
            full_story: &project.story,
        };
        let result = pipeline.generate_chapter(&request, &cancel).await;
        observer.finish();
        if let Some(snapshots) = pipeline.into_snapshots() {
            snapshots.flush().await;
        }

        let panels = match result {
            Ok(panels) => panels,
            Err(e) => {
                eprintln!("Chapter {} failed: {}", chapter.title, e.user_message());
                continue;
            }
        };
        let failed = panels.iter().filter(|p| p.generation_failed).count();
        project.chapters[index].panels = panels;
        store.save(&project).await?;

        let output_dir = Path::new(&config.output_folder)
            .join(&stem)
            .join(format!("chapter_{:02}", index + 1));
        export_chapter(storage.as_ref(), &output_dir, &project.chapters[index]).await?;
        println!(
            "Chapter complete: {:?} ({} panel(s) failed)",
            output_dir, failed
        );
    }

    Ok(())
}
