use std::sync::Arc;

use crate::err::AssemErr;

use super::types::{Expr, Instr, Listener, Program, Stmt};

#[derive(Copy, Clone, Debug, PartialEq)]
enum BlockKind {
    Loop,
    Switch,
}

/// An enclosing loop or switch with the jumps waiting for its addresses
struct Block {
    kind: BlockKind,
    breaks: Vec<usize>,
    continues: Vec<usize>,
}

struct Assembler {
    instrs: Vec<Instr>,
    blocks: Vec<Block>,
}

impl Assembler {
    fn new() -> Assembler {
        Assembler {
            instrs: Vec::new(),
            blocks: Vec::new(),
        }
    }

    fn here(&self) -> usize {
        self.instrs.len()
    }

    fn emit(&mut self, instr: Instr) -> usize {
        self.instrs.push(instr);
        self.instrs.len() - 1
    }

    fn patch(&mut self, at: usize, target: usize) {
        match self.instrs[at] {
            Instr::Jump(ref mut dest)
            | Instr::JumpIf(_, ref mut dest)
            | Instr::JumpUnless(_, ref mut dest)
            | Instr::JumpIfCase(_, ref mut dest) => *dest = target,
            _ => (),
        }
    }

    fn open(&mut self, kind: BlockKind) {
        self.blocks.push(Block {
            kind: kind,
            breaks: Vec::new(),
            continues: Vec::new(),
        });
    }

    /// Close the innermost block, resolving its breaks and continues
    fn close(&mut self, break_to: usize, continue_to: usize) {
        if let Some(block) = self.blocks.pop() {
            for at in block.breaks {
                self.patch(at, break_to);
            }
            for at in block.continues {
                self.patch(at, continue_to);
            }
        }
    }

    fn body(&mut self, stmts: &[Stmt]) -> Result<(), AssemErr> {
        for stmt in stmts {
            self.stmt(stmt)?;
        }
        Ok(())
    }

    fn stmt(&mut self, stmt: &Stmt) -> Result<(), AssemErr> {
        match *stmt {
            Stmt::Assign(ref name, ref value) => {
                self.emit(Instr::Assign(name.clone(), value.clone()));
            }

            Stmt::Call(ref name, ref args) => {
                self.emit(Instr::Eval(Expr::Call(name.clone(), args.clone())));
            }

            Stmt::If {
                ref cond,
                ref then,
                ref otherwise,
            } => {
                let skip_then = self.emit(Instr::JumpUnless(cond.clone(), 0));
                self.body(then)?;
                if otherwise.is_empty() {
                    let end = self.here();
                    self.patch(skip_then, end);
                } else {
                    let skip_else = self.emit(Instr::Jump(0));
                    let start_else = self.here();
                    self.patch(skip_then, start_else);
                    self.body(otherwise)?;
                    let end = self.here();
                    self.patch(skip_else, end);
                }
            }

            Stmt::While { ref cond, ref body } => {
                let top = self.here();
                let exit = self.emit(Instr::JumpUnless(cond.clone(), 0));
                self.open(BlockKind::Loop);
                self.body(body)?;
                self.emit(Instr::Jump(top));
                let end = self.here();
                self.patch(exit, end);
                self.close(end, top);
            }

            Stmt::DoWhile { ref body, ref cond } => {
                let top = self.here();
                self.open(BlockKind::Loop);
                self.body(body)?;
                let check = self.emit(Instr::JumpIf(cond.clone(), top));
                let end = self.here();
                self.close(end, check);
            }

            Stmt::For {
                ref init,
                ref cond,
                ref update,
                ref body,
            } => {
                self.body(init)?;
                let top = self.here();
                let exit = self.emit(Instr::JumpUnless(cond.clone(), 0));
                self.open(BlockKind::Loop);
                self.body(body)?;
                let next = self.here();
                // Update statements belong to the loop header, a stray break
                // in them is not a break out of this loop
                let block = self.blocks.pop();
                self.body(update)?;
                if let Some(block) = block {
                    self.blocks.push(block);
                }
                self.emit(Instr::Jump(top));
                let end = self.here();
                self.patch(exit, end);
                self.close(end, next);
            }

            Stmt::Switch {
                ref subject,
                ref cases,
                ref default,
            } => {
                self.emit(Instr::Push(subject.clone()));
                let tests: Vec<usize> = cases
                    .iter()
                    .map(|case| self.emit(Instr::JumpIfCase(case.value.clone(), 0)))
                    .collect();
                let to_default = self.emit(Instr::Jump(0));

                self.open(BlockKind::Switch);
                let mut exits = Vec::with_capacity(cases.len());
                for (case, test) in cases.iter().zip(tests) {
                    let start = self.here();
                    self.patch(test, start);
                    self.body(&case.body)?;
                    exits.push(self.emit(Instr::Jump(0)));
                }
                let start_default = self.here();
                self.patch(to_default, start_default);
                self.body(default)?;

                let end = self.here();
                for at in exits {
                    self.patch(at, end);
                }
                self.close(end, end);
                self.emit(Instr::Pop);
            }

            Stmt::Break => {
                if self.blocks.is_empty() {
                    return Err(AssemErr::BreakOutsideBlock);
                }
                let at = self.emit(Instr::Jump(0));
                if let Some(block) = self.blocks.last_mut() {
                    block.breaks.push(at);
                }
            }

            Stmt::Continue => {
                let target = self
                    .blocks
                    .iter()
                    .rposition(|b| b.kind == BlockKind::Loop)
                    .ok_or(AssemErr::ContinueOutsideLoop)?;
                // Leaving any switches between here and the loop drops their
                // subjects from the operand stack
                let switches = self.blocks.len() - target - 1;
                for _ in 0..switches {
                    self.emit(Instr::Pop);
                }
                let at = self.emit(Instr::Jump(0));
                self.blocks[target].continues.push(at);
            }

            Stmt::Wait(ref steps) => {
                self.emit(Instr::Wait(steps.clone()));
            }

            Stmt::Step(ref divisor) => {
                self.emit(Instr::Step(divisor.clone()));
            }

            Stmt::On {
                event,
                user_id,
                mode,
                ref body,
            } => {
                let listener = Listener {
                    kind: event,
                    user_id: user_id,
                    mode: mode,
                    program: assemble(body)?,
                };
                self.emit(Instr::Listen(Arc::new(listener)));
            }

            Stmt::Emit {
                ref user_id,
                ref payload,
            } => {
                self.emit(Instr::Emit(user_id.clone(), payload.clone()));
            }

            Stmt::Exit => {
                self.emit(Instr::Exit);
            }
        }
        Ok(())
    }
}

/// Assemble statements into a flat program with resolved jumps
pub fn assemble(stmts: &[Stmt]) -> Result<Program, AssemErr> {
    let mut assem = Assembler::new();
    assem.body(stmts)?;
    Ok(Program::new(assem.instrs))
}
