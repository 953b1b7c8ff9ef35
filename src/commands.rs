pub mod bridge {
    use std::path::PathBuf;

    use tracing::info;

    use crate::bridge::{Bridge, Options};
    use crate::connection::Connection;
    use crate::id_map::IdMap;
    use crate::publish::MqttSink;
    use crate::topic::TopicBase;

    /// Translate between shelly devices and the normalized topic scheme.
    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        connection: crate::connection::Args,

        /// Path to a file with `src dst` device name mappings, one per line.
        #[arg(long, short = 'm')]
        id_map: Option<PathBuf>,

        /// Base topic prepended to all translated messages.
        #[arg(long, default_value = "shellies/")]
        topic_base: String,

        /// Publish translated telemetry with the retain flag set.
        #[arg(long)]
        retain: bool,

        /// Log unknown payload keys at warning level instead of info.
        #[arg(long)]
        unknown_key_warn: bool,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not load the id map")]
        LoadIdMap(#[source] crate::id_map::Error),
        #[error("could not create the async runtime")]
        CreateRuntime(#[source] std::io::Error),
        #[error("connection to the broker failed")]
        Connection(#[source] crate::connection::Error),
        #[error("could not wait for the termination signal")]
        TerminationSignal(#[source] std::io::Error),
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let topic_map = match &args.id_map {
            Some(path) => IdMap::load_aliases(path).map_err(Error::LoadIdMap)?,
            None => IdMap::new(),
        };
        if topic_map.is_empty() {
            info!("id map is empty");
        } else {
            info!("contents of id map:");
            for (src, dst) in topic_map.aliases() {
                info!("    {src} -> {dst}");
            }
        }
        let options = Options {
            topic_base: TopicBase::new(args.topic_base),
            retain: args.retain,
            unknown_key_warn: args.unknown_key_warn,
        };
        // One thread is all the translation needs: messages are handled
        // serially, so the maps never see concurrent access.
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(Error::CreateRuntime)?;
        runtime.block_on(async move {
            let connection = Connection::new(args.connection);
            let sink = MqttSink::new(connection.client.clone());
            let mut bridge = Bridge::new(options, topic_map, sink);
            tokio::select! {
                result = connection.run(&mut bridge) => result.map_err(Error::Connection),
                result = tokio::signal::ctrl_c() => {
                    result.map_err(Error::TerminationSignal)?;
                    info!("received the termination signal, shutting down");
                    Ok(())
                }
            }
        })
    }
}

pub mod id_map {
    use std::path::PathBuf;

    use crate::id_map::IdMap;
    use crate::shelly;

    /// Inspect a device name mapping file.
    #[derive(clap::Parser)]
    pub struct Args {
        /// The mapping file to load.
        file: PathBuf,
        #[clap(flatten)]
        output: crate::output::Args,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not load the id map")]
        LoadIdMap(#[source] crate::id_map::Error),
        #[error("could not output the id map")]
        Output(#[source] crate::output::Error),
    }

    #[derive(serde::Serialize)]
    struct MappingSchema<'a> {
        src: &'a str,
        dst: &'a str,
        generation: Option<u8>,
        model: &'a str,
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let map = IdMap::load_aliases(&args.file).map_err(Error::LoadIdMap)?;
        let rows = map.aliases().map(|(src, dst)| {
            let generation = shelly::classify(src).map(|descriptor| {
                match descriptor.generation {
                    shelly::Generation::V1 => 1,
                    shelly::Generation::V2 => 2,
                }
            });
            let model = shelly::model_name(src);
            let cells = vec![
                src.to_owned(),
                dst.to_owned(),
                generation.map(|g| g.to_string()).unwrap_or_default(),
                model.to_owned(),
            ];
            (cells, MappingSchema { src, dst, generation, model })
        });
        args.output
            .write(&["Source", "Destination", "Generation", "Model"], rows)
            .map_err(Error::Output)
    }
}
