/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use std::{fmt, str::FromStr};

use thiserror::Error;

/// Reasons a line of protocol input could not be turned into a [`Command`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("missing name or value. usage: setoption name <id> value <x>")]
    MissingNameOrValue,

    #[error("FEN not found where one was expected. expected 6 fields, found {found}")]
    MissingFen { found: usize },

    #[error("expected at least one move after {after:?}")]
    MissingMoves { after: &'static str },

    #[error("{0:?} is not a move in coordinate notation (e.g. e2e4)")]
    InvalidMove(String),
}

/// A move in coordinate notation, such as `e2e4`.
///
/// Exactly four characters: a file in `a-h`, a rank in `1-8`, then another file and rank.
/// The only way to obtain one is through [`FromStr`], so every value has that shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AlgebraicMove([u8; 4]);

impl AlgebraicMove {
    /// The move as a string slice.
    pub fn as_str(&self) -> &str {
        // Only ASCII bytes are ever stored
        std::str::from_utf8(&self.0).unwrap_or_default()
    }

    /// Square the move starts on, such as `e2`.
    pub fn from_square(&self) -> &str {
        &self.as_str()[..2]
    }

    /// Square the move ends on, such as `e4`.
    pub fn to_square(&self) -> &str {
        &self.as_str()[2..]
    }
}

impl FromStr for AlgebraicMove {
    type Err = ParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseError::InvalidMove(s.to_string());

        let bytes: [u8; 4] = s.as_bytes().try_into().map_err(|_| invalid())?;
        let is_file = |b: u8| (b'a'..=b'h').contains(&b);
        let is_rank = |b: u8| (b'1'..=b'8').contains(&b);

        if is_file(bytes[0]) && is_rank(bytes[1]) && is_file(bytes[2]) && is_rank(bytes[3]) {
            Ok(Self(bytes))
        } else {
            Err(invalid())
        }
    }
}

impl fmt::Display for AlgebraicMove {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters of a `go` command.
///
/// Numeric fields are `None` when their flag was absent or not followed by an integer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GoOptions {
    /// Search in pondering mode.
    pub ponder: bool,

    /// Search until `stop` is received.
    pub infinite: bool,

    /// Restrict the search to these moves.
    pub search_moves: Option<Vec<AlgebraicMove>>,

    /// White's remaining time, in milliseconds.
    pub wtime: Option<i64>,

    /// Black's remaining time, in milliseconds.
    pub btime: Option<i64>,

    /// White's increment per move, in milliseconds.
    pub winc: Option<i64>,

    /// Black's increment per move, in milliseconds.
    pub binc: Option<i64>,

    /// Moves remaining until the next time control.
    pub movestogo: Option<i64>,

    /// Maximum depth to search, in plies.
    pub depth: Option<i64>,

    /// Maximum number of nodes to search.
    pub nodes: Option<i64>,

    /// Search for a mate in this many moves.
    pub mate: Option<i64>,

    /// Search for exactly this many milliseconds.
    pub movetime: Option<i64>,
}

impl GoOptions {
    /// Every token that has a meaning of its own after `go`.
    const KEYWORDS: [&'static str; 12] = [
        "searchmoves",
        "ponder",
        "wtime",
        "btime",
        "winc",
        "binc",
        "movestogo",
        "depth",
        "nodes",
        "mate",
        "movetime",
        "infinite",
    ];

    fn parse(args: &[&str]) -> Result<Self, ParseError> {
        let number_after = |flag: &str| -> Option<i64> {
            let idx = args.iter().position(|&token| token == flag)?;
            args.get(idx + 1)?.parse().ok()
        };

        let search_moves = match args.iter().position(|&token| token == "searchmoves") {
            Some(idx) => {
                let moves = args[idx + 1..]
                    .iter()
                    .take_while(|token| !Self::KEYWORDS.contains(token));
                Some(parse_moves(moves, "searchmoves")?)
            }
            None => None,
        };

        Ok(Self {
            ponder: args.contains(&"ponder"),
            infinite: args.contains(&"infinite"),
            search_moves,
            wtime: number_after("wtime"),
            btime: number_after("btime"),
            winc: number_after("winc"),
            binc: number_after("binc"),
            movestogo: number_after("movestogo"),
            depth: number_after("depth"),
            nodes: number_after("nodes"),
            mate: number_after("mate"),
            movetime: number_after("movetime"),
        })
    }
}

/// A single command received over the protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `uci`
    Uci,

    /// `debug [on | off]`
    Debug { on: bool },

    /// `isready`
    IsReady,

    /// `setoption name <id> value <x>`
    SetOption { name: String, value: String },

    /// `register ...`
    Register,

    /// `ucinewgame`
    UciNewGame,

    /// `position [fen <fenstring> | startpos] [moves <move1> ... <movei>]`
    ///
    /// `fen` is `None` for the starting position.
    Position {
        fen: Option<String>,
        moves: Option<Vec<AlgebraicMove>>,
    },

    /// `go ...`
    Go(GoOptions),

    /// `stop`
    Stop,

    /// `ponderhit`
    PonderHit,

    /// `quit`
    Exit,

    /// Anything whose first token isn't a known command.
    Unknown,
}

impl Command {
    /// Parses a raw line of protocol input.
    ///
    /// Lines with an unrecognized (or no) first token become [`Command::Unknown`];
    /// only malformed arguments to a known command are errors.
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let tokens = line.split_whitespace().collect::<Vec<_>>();
        let Some((&name, args)) = tokens.split_first() else {
            return Ok(Self::Unknown);
        };

        let cmd = match name {
            "uci" => Self::Uci,
            "debug" => Self::Debug {
                on: args.first() == Some(&"on"),
            },
            "isready" => Self::IsReady,
            "setoption" => parse_set_option(args)?,
            "register" => Self::Register,
            "ucinewgame" => Self::UciNewGame,
            "position" => parse_position(args)?,
            "go" => Self::Go(GoOptions::parse(args)?),
            "stop" => Self::Stop,
            "ponderhit" => Self::PonderHit,
            "quit" => Self::Exit,
            _ => Self::Unknown,
        };

        Ok(cmd)
    }

    /// Protocol keyword of this command, for logging.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Uci => "uci",
            Self::Debug { .. } => "debug",
            Self::IsReady => "isready",
            Self::SetOption { .. } => "setoption",
            Self::Register => "register",
            Self::UciNewGame => "ucinewgame",
            Self::Position { .. } => "position",
            Self::Go(_) => "go",
            Self::Stop => "stop",
            Self::PonderHit => "ponderhit",
            Self::Exit => "quit",
            Self::Unknown => "unknown",
        }
    }
}

impl FromStr for Command {
    type Err = ParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Parses the arguments of `setoption`.
///
/// The name is every token between `name` and `value`; the value is every token after `value`.
fn parse_set_option(args: &[&str]) -> Result<Command, ParseError> {
    let name_idx = args
        .iter()
        .position(|&token| token == "name")
        .ok_or(ParseError::MissingNameOrValue)?;

    let rest = &args[name_idx + 1..];
    let value_idx = rest
        .iter()
        .position(|&token| token == "value")
        .ok_or(ParseError::MissingNameOrValue)?;

    let name = rest[..value_idx].join(" ");
    let value = rest[value_idx + 1..].join(" ");

    if name.is_empty() || value.is_empty() {
        return Err(ParseError::MissingNameOrValue);
    }

    Ok(Command::SetOption { name, value })
}

/// Parses the arguments of `position`.
fn parse_position(args: &[&str]) -> Result<Command, ParseError> {
    let moves_idx = args.iter().position(|&token| token == "moves");

    let fen = match args.iter().position(|&token| token == "fen") {
        Some(idx) => {
            let fields = args[idx + 1..]
                .iter()
                .take_while(|&&token| token != "moves")
                .take(6)
                .copied()
                .collect::<Vec<_>>();

            if fields.len() != 6 {
                return Err(ParseError::MissingFen {
                    found: fields.len(),
                });
            }
            Some(fields.join(" "))
        }
        None => None,
    };

    let moves = match moves_idx {
        Some(idx) => Some(parse_moves(args[idx + 1..].iter(), "moves")?),
        None => None,
    };

    Ok(Command::Position { fen, moves })
}

/// Parses every token in `tokens` as an [`AlgebraicMove`], requiring at least one.
fn parse_moves<'a>(
    tokens: impl Iterator<Item = &'a &'a str>,
    after: &'static str,
) -> Result<Vec<AlgebraicMove>, ParseError> {
    let moves = tokens
        .map(|token| token.parse())
        .collect::<Result<Vec<AlgebraicMove>, _>>()?;

    if moves.is_empty() {
        return Err(ParseError::MissingMoves { after });
    }

    Ok(moves)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn mv(s: &str) -> AlgebraicMove {
        s.parse().unwrap()
    }

    #[test]
    fn test_argumentless_commands() {
        let cases = [
            ("uci", Command::Uci),
            ("isready", Command::IsReady),
            ("register later", Command::Register),
            ("ucinewgame", Command::UciNewGame),
            ("stop", Command::Stop),
            ("ponderhit", Command::PonderHit),
            ("quit", Command::Exit),
            ("   uci   ", Command::Uci),
        ];

        for (input, expected) in cases {
            assert_eq!(Command::parse(input), Ok(expected), "parsing {input:?}");
        }
    }

    #[test]
    fn test_unknown_commands() {
        for input in ["", "   ", "UCI", "Quit", "hello world", "d"] {
            assert_eq!(Command::parse(input), Ok(Command::Unknown), "parsing {input:?}");
        }
    }

    #[test]
    fn test_debug() {
        assert_eq!(Command::parse("debug on"), Ok(Command::Debug { on: true }));
        assert_eq!(Command::parse("debug off"), Ok(Command::Debug { on: false }));
        assert_eq!(Command::parse("debug"), Ok(Command::Debug { on: false }));
        assert_eq!(Command::parse("debug ON"), Ok(Command::Debug { on: false }));
    }

    #[test]
    fn test_setoption() {
        assert_eq!(
            Command::parse("setoption name Hash value 128"),
            Ok(Command::SetOption {
                name: String::from("Hash"),
                value: String::from("128")
            })
        );

        assert_eq!(
            Command::parse("setoption name Clear Hash value now please"),
            Ok(Command::SetOption {
                name: String::from("Clear Hash"),
                value: String::from("now please")
            })
        );

        for input in [
            "setoption",
            "setoption name Hash",
            "setoption name Hash value",
            "setoption name value 5",
            "setoption Hash value 5",
        ] {
            assert_eq!(
                Command::parse(input),
                Err(ParseError::MissingNameOrValue),
                "parsing {input:?}"
            );
        }
    }

    #[test]
    fn test_position_startpos() {
        assert_eq!(
            Command::parse("position startpos"),
            Ok(Command::Position {
                fen: None,
                moves: None
            })
        );

        assert_eq!(
            Command::parse("position startpos moves e2e4 e7e5"),
            Ok(Command::Position {
                fen: None,
                moves: Some(vec![mv("e2e4"), mv("e7e5")])
            })
        );
    }

    #[test]
    fn test_position_fen() {
        let fen = "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1";
        assert_eq!(
            Command::parse(&format!("position fen {fen}")),
            Ok(Command::Position {
                fen: Some(fen.to_string()),
                moves: None
            })
        );

        // Extra whitespace between fields is collapsed
        assert_eq!(
            Command::parse("position   fen  8/8/8/8/8/8/8/8   w - -  0 1"),
            Ok(Command::Position {
                fen: Some(String::from("8/8/8/8/8/8/8/8 w - - 0 1")),
                moves: None
            })
        );
    }

    #[test]
    fn test_position_errors() {
        assert_eq!(
            Command::parse("position fen 8/8/8/8/8/8/8/8 w - -"),
            Err(ParseError::MissingFen { found: 4 })
        );
        assert_eq!(
            Command::parse("position fen 8/8/8/8/8/8/8/8 w - moves e2e4"),
            Err(ParseError::MissingFen { found: 3 })
        );
        assert_eq!(
            Command::parse("position startpos moves"),
            Err(ParseError::MissingMoves { after: "moves" })
        );
        assert_eq!(
            Command::parse("position startpos moves e2e4 e7e5q"),
            Err(ParseError::InvalidMove(String::from("e7e5q")))
        );
        assert_eq!(
            Command::parse("position startpos moves e2e4 i7i5"),
            Err(ParseError::InvalidMove(String::from("i7i5")))
        );
    }

    #[test]
    fn test_go_numbers() {
        let Ok(Command::Go(go)) = Command::parse("go wtime 300000 btime 300000 depth 20") else {
            panic!("failed to parse go");
        };

        assert_eq!(
            go,
            GoOptions {
                wtime: Some(300000),
                btime: Some(300000),
                depth: Some(20),
                ..Default::default()
            }
        );
        assert!(!go.ponder);
        assert!(!go.infinite);
    }

    #[test]
    fn test_go_every_flag() {
        let Ok(Command::Go(go)) = Command::parse(
            "go ponder wtime 1 btime 2 winc 3 binc 4 movestogo 5 depth 6 nodes 7 mate 8 movetime 9 infinite",
        ) else {
            panic!("failed to parse go");
        };

        assert!(go.ponder);
        assert!(go.infinite);
        assert_eq!(go.search_moves, None);
        assert_eq!(
            [
                go.wtime,
                go.btime,
                go.winc,
                go.binc,
                go.movestogo,
                go.depth,
                go.nodes,
                go.mate,
                go.movetime
            ],
            [1, 2, 3, 4, 5, 6, 7, 8, 9].map(Some)
        );
    }

    #[test]
    fn test_go_missing_numbers_are_unset() {
        let Ok(Command::Go(go)) = Command::parse("go depth infinite movetime abc wtime") else {
            panic!("failed to parse go");
        };

        assert_eq!(go.depth, None);
        assert_eq!(go.movetime, None);
        assert_eq!(go.wtime, None);
        assert!(go.infinite);
    }

    #[test]
    fn test_go_searchmoves() {
        let Ok(Command::Go(go)) = Command::parse("go searchmoves e2e4 g1f3") else {
            panic!("failed to parse go");
        };
        assert_eq!(go.search_moves, Some(vec![mv("e2e4"), mv("g1f3")]));

        let Ok(Command::Go(go)) = Command::parse("go searchmoves e2e4 depth 5") else {
            panic!("failed to parse go");
        };
        assert_eq!(go.search_moves, Some(vec![mv("e2e4")]));
        assert_eq!(go.depth, Some(5));

        assert_eq!(
            Command::parse("go searchmoves e2e9"),
            Err(ParseError::InvalidMove(String::from("e2e9")))
        );
        assert_eq!(
            Command::parse("go searchmoves infinite"),
            Err(ParseError::MissingMoves {
                after: "searchmoves"
            })
        );
    }

    #[test]
    fn test_algebraic_move_shape() {
        for good in ["a1a1", "h8h8", "e2e4", "g1f3"] {
            let mv = good.parse::<AlgebraicMove>().unwrap();
            assert_eq!(mv.to_string(), good);
        }

        for bad in ["", "e2", "e2e", "e2e44", "E2E4", "e0e4", "z2e4", "e2 e", "é2e4"] {
            assert!(bad.parse::<AlgebraicMove>().is_err(), "{bad:?} accepted");
        }

        let mv = mv("b1c3");
        assert_eq!(mv.from_square(), "b1");
        assert_eq!(mv.to_square(), "c3");
    }

    fn fen_field() -> impl Strategy<Value = String> {
        "[1-8pnbrqkPNBRQK/]{1,20}|[wb]|-|[KQkq]{1,4}|[0-9]{1,3}"
    }

    fn algebraic_move() -> impl Strategy<Value = String> {
        "[a-h][1-8][a-h][1-8]"
    }

    proptest! {
        #[test]
        fn position_fen_with_moves_parses(
            fields in prop::array::uniform6(fen_field()),
            moves in prop::collection::vec(algebraic_move(), 1..12),
        ) {
            let fen = fields.join(" ");
            let line = format!("position fen {fen} moves {}", moves.join(" "));

            let expected = Command::Position {
                fen: Some(fen),
                moves: Some(moves.iter().map(|m| m.parse().unwrap()).collect()),
            };
            prop_assert_eq!(Command::parse(&line), Ok(expected));
        }

        #[test]
        fn parse_never_panics(line in "\\PC{0,80}") {
            let _ = Command::parse(&line);
        }
    }
}
