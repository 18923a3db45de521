//! Combined log output of a project

use crate::container::{LogChunk, LogStream};
use crate::error::Result;
use futures::stream::{self, BoxStream, StreamExt};

/// Item of a combined project log stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    /// Output that follows belongs to this container
    Section { service: String, container: String },
    /// A chunk of container output
    Output(LogChunk),
}

/// Log stream spanning several containers
pub type ProjectLogStream = BoxStream<'static, Result<LogEvent>>;

/// One container's opened log stream
pub struct ContainerLogs {
    pub service: String,
    pub container: String,
    pub stream: LogStream,
}

/// Concatenate container streams in the given order.
///
/// Each container's output is preceded by a section marker. Streams are not
/// interleaved, so a followed stream holds back every container after it.
pub fn combine(sources: Vec<ContainerLogs>) -> ProjectLogStream {
    let sections = sources.into_iter().map(|source| {
        let marker = LogEvent::Section {
            service: source.service,
            container: source.container,
        };
        stream::once(futures::future::ready(Ok(marker)))
            .chain(source.stream.map(|chunk| chunk.map(LogEvent::Output)))
    });

    stream::iter(sections).flatten().boxed()
}
