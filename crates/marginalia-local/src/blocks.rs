//! Markdown to annotatable block extraction.
//!
//! Walks the pulldown-cmark event stream and emits one `RenderedBlock` per
//! paragraph and per list item, in page order, with inline formatting
//! flattened to the text a reader actually sees. Headings, code blocks,
//! tables, and images are not annotatable and yield no blocks. Blocks are
//! non-overlapping: a loose list item's wrapper paragraphs fold into the
//! item, and a nested list's items never repeat inside their parent.

use marginalia_core::{BlockKind, RenderedBlock};
use pulldown_cmark::{Event, Options, Parser, Tag};

/// Extract the annotatable blocks of a markdown section, in page order.
/// `block_index` values are consecutive from 0.
pub fn extract_blocks(markdown: &str) -> Vec<RenderedBlock> {
    let parser = Parser::new_ext(
        markdown,
        Options::ENABLE_STRIKETHROUGH | Options::ENABLE_TABLES,
    );
    let mut walker = BlockWalker::default();
    for event in parser {
        walker.on_event(event);
    }
    walker.finish()
}

/// What a `Start` tag meant to us; popped on the matching `End`.
///
/// pulldown guarantees well-nested start/end pairs, so a shadow stack frees
/// the `End` handling from caring about tag payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    /// Paragraph emitted as its own block.
    ParagraphBlock,
    /// Paragraph folded into the enclosing list item.
    ItemParagraph,
    Item,
    List,
    Quote,
    /// Heading, code block, table, image: text inside is dropped.
    Suppressed,
    /// Inline formatting and anything else with no structural effect.
    Inline,
}

#[derive(Debug, Clone, Copy)]
struct ListCtx {
    ordinal: usize,
    item: usize,
}

#[derive(Debug)]
struct BlockBuilder {
    kind: BlockKind,
    path: String,
    text: String,
    last_space: bool,
}

impl BlockBuilder {
    fn new(kind: BlockKind, path: String) -> Self {
        Self {
            kind,
            path,
            text: String::new(),
            last_space: true,
        }
    }

    /// Append visible text, collapsing whitespace runs to single spaces.
    fn push_text(&mut self, chunk: &str) {
        for ch in chunk.chars() {
            if ch.is_whitespace() {
                if !self.last_space {
                    self.text.push(' ');
                    self.last_space = true;
                }
            } else {
                self.text.push(ch);
                self.last_space = false;
            }
        }
    }

    /// Hard breaks and folded-paragraph seams stay as newlines, like a
    /// rendered `<br>`.
    fn push_break(&mut self) {
        while self.text.ends_with(' ') {
            self.text.pop();
        }
        if !self.text.is_empty() {
            self.text.push('\n');
        }
        self.last_space = true;
    }
}

#[derive(Default)]
struct BlockWalker {
    blocks: Vec<RenderedBlock>,
    cur: Option<BlockBuilder>,
    scopes: Vec<Scope>,
    lists: Vec<ListCtx>,
    lists_seen: usize,
    paragraphs_seen: usize,
    quote_depth: usize,
    suppress_depth: usize,
}

impl BlockWalker {
    fn on_event(&mut self, event: Event<'_>) {
        match event {
            Event::Start(tag) => self.on_start(tag),
            Event::End(_) => self.on_end(),
            Event::Text(text) => self.on_text(&text),
            Event::Code(code) => self.on_text(&code),
            Event::SoftBreak => self.on_text(" "),
            Event::HardBreak => {
                if self.suppress_depth == 0 {
                    if let Some(b) = self.cur.as_mut() {
                        b.push_break();
                    }
                }
            }
            // Raw HTML tags are not visible text; inline HTML content still
            // arrives as Text events and is kept.
            _ => {}
        }
    }

    fn on_start(&mut self, tag: Tag<'_>) {
        if self.suppress_depth > 0 {
            // Inside suppressed content nothing changes state; nested
            // suppressing tags are balanced by the shadow stack alone.
            self.scopes.push(match tag {
                Tag::Heading { .. }
                | Tag::CodeBlock(_)
                | Tag::Table(_)
                | Tag::Image { .. }
                | Tag::HtmlBlock
                | Tag::FootnoteDefinition(_)
                | Tag::MetadataBlock(_) => {
                    self.suppress_depth += 1;
                    Scope::Suppressed
                }
                _ => Scope::Inline,
            });
            return;
        }
        let scope = match tag {
            Tag::Paragraph => {
                let in_item = matches!(&self.cur, Some(b) if b.kind == BlockKind::ListItem);
                if in_item {
                    if let Some(b) = self.cur.as_mut() {
                        if !b.text.is_empty() {
                            b.push_break();
                        }
                    }
                    Scope::ItemParagraph
                } else {
                    self.paragraphs_seen += 1;
                    self.cur = Some(BlockBuilder::new(
                        BlockKind::Paragraph,
                        self.paragraph_path(),
                    ));
                    Scope::ParagraphBlock
                }
            }
            Tag::List(_) => {
                // A list opening inside an item ends the item's own text;
                // the nested items become blocks of their own.
                self.take_and_finish();
                self.lists_seen += 1;
                self.lists.push(ListCtx {
                    ordinal: self.lists_seen,
                    item: 0,
                });
                Scope::List
            }
            Tag::Item => {
                self.take_and_finish();
                if let Some(ctx) = self.lists.last_mut() {
                    ctx.item += 1;
                }
                self.cur = Some(BlockBuilder::new(BlockKind::ListItem, self.item_path()));
                Scope::Item
            }
            Tag::BlockQuote(_) => {
                self.quote_depth += 1;
                Scope::Quote
            }
            Tag::Heading { .. }
            | Tag::CodeBlock(_)
            | Tag::Table(_)
            | Tag::Image { .. }
            | Tag::HtmlBlock
            | Tag::FootnoteDefinition(_)
            | Tag::MetadataBlock(_) => {
                self.suppress_depth += 1;
                Scope::Suppressed
            }
            _ => Scope::Inline,
        };
        self.scopes.push(scope);
    }

    fn on_end(&mut self) {
        match self.scopes.pop() {
            Some(Scope::ParagraphBlock) => self.take_and_finish(),
            Some(Scope::Item) => {
                self.take_and_finish();
            }
            Some(Scope::List) => {
                self.lists.pop();
                // Text continuing in the parent item after a nested list
                // becomes a fresh builder for that item; dropped if empty.
                if self.scopes.last() == Some(&Scope::Item) {
                    self.cur = Some(BlockBuilder::new(BlockKind::ListItem, self.item_path()));
                }
            }
            Some(Scope::Quote) => self.quote_depth = self.quote_depth.saturating_sub(1),
            Some(Scope::Suppressed) => {
                self.suppress_depth = self.suppress_depth.saturating_sub(1);
            }
            Some(Scope::ItemParagraph) | Some(Scope::Inline) | None => {}
        }
    }

    fn on_text(&mut self, chunk: &str) {
        if self.suppress_depth > 0 {
            return;
        }
        if let Some(b) = self.cur.as_mut() {
            b.push_text(chunk);
        }
    }

    fn take_and_finish(&mut self) {
        if let Some(builder) = self.cur.take() {
            let plain_text = builder.text.trim().to_string();
            if plain_text.is_empty() {
                return;
            }
            self.blocks.push(RenderedBlock {
                block_index: self.blocks.len(),
                plain_text,
                kind: builder.kind,
                container_path: builder.path,
            });
        }
    }

    fn paragraph_path(&self) -> String {
        if self.quote_depth > 0 {
            format!("blockquote > paragraph {}", self.paragraphs_seen)
        } else {
            format!("paragraph {}", self.paragraphs_seen)
        }
    }

    fn item_path(&self) -> String {
        let mut segments: Vec<String> = Vec::with_capacity(self.lists.len());
        for ctx in &self.lists {
            segments.push(format!("list {} > item {}", ctx.ordinal, ctx.item));
        }
        let path = segments.join(" > ");
        if self.quote_depth > 0 {
            format!("blockquote > {path}")
        } else {
            path
        }
    }

    fn finish(mut self) -> Vec<RenderedBlock> {
        self.take_and_finish();
        self.blocks
    }
}
