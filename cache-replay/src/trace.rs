//! 访问序列的格式，每行一条：
//!
//! ```text
//! r <sector>    共享获取并读
//! w <sector>    独占获取，改首字节并标脏
//! z <sector>    独占获取并清零
//! p <sector>    预读
//! f             同步写回
//! ```
//!
//! 空行和`#`之后的内容被忽略。

use std::io::{self, BufRead};

use buffer_cache::{BufferCache, Mode, Scheduler, SectorId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Read(SectorId),
    Write(SectorId),
    Zero(SectorId),
    Readahead(SectorId),
    Flush,
}

impl Op {
    pub fn sector(&self) -> Option<SectorId> {
        match *self {
            Op::Read(sector) | Op::Write(sector) | Op::Zero(sector) | Op::Readahead(sector) => {
                Some(sector)
            }
            Op::Flush => None,
        }
    }
}

pub fn parse_trace(reader: impl BufRead) -> io::Result<Vec<Op>> {
    let mut ops = Vec::new();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.split('#').next().unwrap_or_default().trim();
        if line.is_empty() {
            continue;
        }

        let op = parse_op(line).map_err(|msg| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("trace line {}: {msg}: {line:?}", index + 1),
            )
        })?;
        ops.push(op);
    }

    Ok(ops)
}

fn parse_op(line: &str) -> Result<Op, &'static str> {
    let mut words = line.split_whitespace();
    let cmd = words.next().ok_or("empty command")?;
    let sector = words
        .next()
        .map(|word| word.parse::<usize>().map(SectorId::new))
        .transpose()
        .map_err(|_| "bad sector number")?;
    if words.next().is_some() {
        return Err("trailing words");
    }

    match (cmd, sector) {
        ("f", None) => Ok(Op::Flush),
        ("f", Some(_)) => Err("flush takes no sector"),
        (_, None) => Err("missing sector"),
        ("r", Some(sector)) => Ok(Op::Read(sector)),
        ("w", Some(sector)) => Ok(Op::Write(sector)),
        ("z", Some(sector)) => Ok(Op::Zero(sector)),
        ("p", Some(sector)) => Ok(Op::Readahead(sector)),
        _ => Err("unknown command"),
    }
}

/// 按顺序在缓存上执行访问序列
pub fn replay<S: Scheduler>(cache: &BufferCache<S>, ops: &[Op]) {
    for &op in ops {
        log::trace!("replay {op:?}");
        match op {
            Op::Read(sector) => {
                let handle = cache.get_block(sector, Mode::Shared);
                let first = handle.read()[0];
                log::trace!("sector {sector} starts with {first:#04x}");
            }
            Op::Write(sector) => {
                let mut handle = cache.get_block(sector, Mode::Exclusive);
                let data = handle.modify();
                data[0] = data[0].wrapping_add(1);
                handle.mark_dirty();
            }
            Op::Zero(sector) => {
                let mut handle = cache.get_block(sector, Mode::Exclusive);
                handle.zero();
            }
            Op::Readahead(sector) => cache.readahead(sector),
            Op::Flush => cache.flush(),
        }
    }
}
