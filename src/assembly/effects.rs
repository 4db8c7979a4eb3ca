//! Per-instruction operand stack and local variable type effects.
//!
//! [`step_types`] applies one instruction to a [`DataPoint`], the abstract
//! state of locals and operand stack. Stack entries are slots: a `long` or
//! `double` occupies two, the upper one being [`VarType::GROUP2EMPTY`], so the
//! `dup`/`pop2`/`swap` family works on raw slots exactly as the JVM does.
//!
//! The simulator exists for subroutine inlining, which must tell `astore`/`pop`
//! of a `jsr` return address apart from ordinary stores.

use crate::{
    assembly::{opcodes::*, ConstantPool, Instruction, MethodDescriptor, TypeCode, VarType},
    Result,
};

/// Abstract machine state at one program point.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataPoint {
    /// Local variable slots; missing slots are unknown
    pub locals: Vec<VarType>,
    /// Operand stack slots, bottom first
    pub stack: Vec<VarType>,
}

impl DataPoint {
    /// State at method entry: `this` (unless static) followed by the parameters.
    #[must_use]
    pub fn initial(descriptor: &MethodDescriptor, is_static: bool, this_class: &str) -> Self {
        let mut point = DataPoint::default();
        let mut slot = 0usize;
        if !is_static {
            point.set_local(0, VarType::object(this_class));
            slot = 1;
        }
        for param in &descriptor.params {
            point.set_local(slot, param.clone());
            slot += usize::from(param.stack_size());
        }
        point
    }

    /// State at an exception handler entry: given locals, the caught value on the stack.
    #[must_use]
    pub fn handler_entry(locals: Vec<VarType>, caught: VarType) -> Self {
        DataPoint {
            locals,
            stack: vec![caught],
        }
    }

    /// Type of local `index`, if assigned.
    #[must_use]
    pub fn local(&self, index: usize) -> Option<&VarType> {
        self.locals.get(index).filter(|t| t.code != TypeCode::Unknown)
    }

    /// Stores `ty` into local `index`; category-2 values also claim `index + 1`.
    pub fn set_local(&mut self, index: usize, ty: VarType) {
        let size = usize::from(ty.stack_size().max(1));
        if self.locals.len() < index + size {
            self.locals.resize(index + size, VarType::UNKNOWN);
        }
        if size == 2 {
            self.locals[index + 1] = VarType::GROUP2EMPTY;
        }
        self.locals[index] = ty;
    }

    /// Pushes a value, adding the empty upper slot for category-2 types.
    pub fn push(&mut self, ty: VarType) {
        match ty.stack_size() {
            0 => {}
            2 => {
                self.stack.push(ty);
                self.stack.push(VarType::GROUP2EMPTY);
            }
            _ => self.stack.push(ty),
        }
    }

    /// Pops one slot.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] on stack underflow.
    pub fn pop(&mut self) -> Result<VarType> {
        self.stack
            .pop()
            .ok_or_else(|| malformed_error!("Operand stack underflow"))
    }

    /// Pops `count` slots.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] on stack underflow.
    pub fn pop_slots(&mut self, count: usize) -> Result<()> {
        if self.stack.len() < count {
            return Err(malformed_error!(
                "Operand stack underflow: need {} slots, have {}",
                count,
                self.stack.len()
            ));
        }
        self.stack.truncate(self.stack.len() - count);
        Ok(())
    }

    /// Top of stack.
    #[must_use]
    pub fn peek(&self) -> Option<&VarType> {
        self.stack.last()
    }

    /// Copies the top `count` slots and inserts the copy `depth` slots below them.
    fn dup_slots(&mut self, count: usize, depth: usize) -> Result<()> {
        let len = self.stack.len();
        if len < count + depth {
            return Err(malformed_error!("Operand stack underflow in dup"));
        }
        let copied: Vec<VarType> = self.stack[len - count..].to_vec();
        let at = len - count - depth;
        self.stack.splice(at..at, copied);
        Ok(())
    }
}

/// Fixed stack effects: `(slots popped, value pushed)`.
fn fixed_impact(opcode: u8) -> Option<(usize, Option<VarType>)> {
    let impact = match opcode {
        NOP | GOTO | RET | IINC => (0, None),
        ACONST_NULL => (0, Some(VarType::NULL)),
        ICONST_M1..=ICONST_5 | BIPUSH | SIPUSH => (0, Some(VarType::INT)),
        LCONST_0 | LCONST_1 => (0, Some(VarType::LONG)),
        FCONST_0..=FCONST_2 => (0, Some(VarType::FLOAT)),
        DCONST_0 | DCONST_1 => (0, Some(VarType::DOUBLE)),
        ILOAD => (0, Some(VarType::INT)),
        LLOAD => (0, Some(VarType::LONG)),
        FLOAD => (0, Some(VarType::FLOAT)),
        DLOAD => (0, Some(VarType::DOUBLE)),
        IALOAD | BALOAD | CALOAD | SALOAD => (2, Some(VarType::INT)),
        LALOAD => (2, Some(VarType::LONG)),
        FALOAD => (2, Some(VarType::FLOAT)),
        DALOAD => (2, Some(VarType::DOUBLE)),
        IASTORE | FASTORE | AASTORE | BASTORE | CASTORE | SASTORE => (3, None),
        LASTORE | DASTORE => (4, None),
        POP | IFEQ..=IFLE | IFNULL | IFNONNULL | TABLESWITCH | LOOKUPSWITCH => (1, None),
        IRETURN | FRETURN | ARETURN | ATHROW | MONITORENTER | MONITOREXIT => (1, None),
        POP2 | IF_ICMPEQ..=IF_ACMPNE | LRETURN | DRETURN => (2, None),
        RETURN => (0, None),
        IADD | ISUB | IMUL | IDIV | IREM | ISHL | ISHR | IUSHR | IAND | IOR | IXOR => {
            (2, Some(VarType::INT))
        }
        LADD | LSUB | LMUL | LDIV | LREM | LAND | LOR | LXOR => (4, Some(VarType::LONG)),
        LSHL | LSHR | LUSHR => (3, Some(VarType::LONG)),
        FADD | FSUB | FMUL | FDIV | FREM => (2, Some(VarType::FLOAT)),
        DADD | DSUB | DMUL | DDIV | DREM => (4, Some(VarType::DOUBLE)),
        INEG | I2B | I2C | I2S => (1, Some(VarType::INT)),
        LNEG => (2, Some(VarType::LONG)),
        FNEG => (1, Some(VarType::FLOAT)),
        DNEG => (2, Some(VarType::DOUBLE)),
        I2L | F2L => (1, Some(VarType::LONG)),
        I2F => (1, Some(VarType::FLOAT)),
        I2D | F2D => (1, Some(VarType::DOUBLE)),
        L2I | D2I => (2, Some(VarType::INT)),
        L2F | D2F => (2, Some(VarType::FLOAT)),
        L2D => (2, Some(VarType::DOUBLE)),
        D2L => (2, Some(VarType::LONG)),
        F2I => (1, Some(VarType::INT)),
        LCMP | DCMPL | DCMPG => (4, Some(VarType::INT)),
        FCMPL | FCMPG => (2, Some(VarType::INT)),
        ARRAYLENGTH | INSTANCEOF => (1, Some(VarType::INT)),
        JSR => (0, Some(VarType::ADDRESS)),
        _ => return None,
    };
    Some(impact)
}

/// Element type of a `newarray` type code.
fn primitive_array_element(atype: i32) -> Option<VarType> {
    Some(match atype {
        4 => VarType::BOOLEAN,
        5 => VarType::CHAR,
        6 => VarType::FLOAT,
        7 => VarType::DOUBLE,
        8 => VarType::BYTE,
        9 => VarType::SHORT,
        10 => VarType::INT,
        11 => VarType::LONG,
        _ => return None,
    })
}

fn operand_slot(instr: &Instruction) -> Result<usize> {
    instr
        .operand(0)
        .and_then(|v| usize::try_from(v).ok())
        .ok_or_else(|| malformed_error!("Missing local slot operand at offset {}", instr.offset))
}

fn pool_index(instr: &Instruction) -> Result<u16> {
    instr
        .operand(0)
        .and_then(|v| u16::try_from(v).ok())
        .ok_or_else(|| malformed_error!("Missing pool index operand at offset {}", instr.offset))
}

/// Applies the type effect of `instr` to `data`.
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] on stack underflow, missing operands or
/// unresolvable constant-pool references.
pub fn step_types(data: &mut DataPoint, instr: &Instruction, pool: &dyn ConstantPool) -> Result<()> {
    if let Some((pops, push)) = fixed_impact(instr.opcode) {
        data.pop_slots(pops)?;
        if let Some(ty) = push {
            data.push(ty);
        }
        return Ok(());
    }

    match instr.opcode {
        LDC | LDC_W | LDC2_W => data.push(pool.constant_type(pool_index(instr)?)?),
        ALOAD => {
            let slot = operand_slot(instr)?;
            let ty = data.local(slot).cloned().unwrap_or_else(VarType::root_object);
            data.push(ty);
        }
        ISTORE | FSTORE | ASTORE => {
            let slot = operand_slot(instr)?;
            let ty = data.pop()?;
            let ty = match instr.opcode {
                ISTORE => VarType::INT,
                FSTORE => VarType::FLOAT,
                _ => ty,
            };
            data.set_local(slot, ty);
        }
        LSTORE | DSTORE => {
            let slot = operand_slot(instr)?;
            data.pop_slots(2)?;
            let ty = if instr.opcode == LSTORE {
                VarType::LONG
            } else {
                VarType::DOUBLE
            };
            data.set_local(slot, ty);
        }
        AALOAD => {
            data.pop()?;
            let array = data.pop()?;
            let element = array.element_type().unwrap_or_else(VarType::root_object);
            data.push(element);
        }
        DUP => data.dup_slots(1, 0)?,
        DUP_X1 => data.dup_slots(1, 1)?,
        DUP_X2 => data.dup_slots(1, 2)?,
        DUP2 => data.dup_slots(2, 0)?,
        DUP2_X1 => data.dup_slots(2, 1)?,
        DUP2_X2 => data.dup_slots(2, 2)?,
        SWAP => {
            let a = data.pop()?;
            let b = data.pop()?;
            data.stack.push(a);
            data.stack.push(b);
        }
        GETSTATIC => data.push(pool.field_type(pool_index(instr)?)?),
        PUTSTATIC => {
            let ty = pool.field_type(pool_index(instr)?)?;
            data.pop_slots(usize::from(ty.stack_size()))?;
        }
        GETFIELD => {
            let ty = pool.field_type(pool_index(instr)?)?;
            data.pop()?;
            data.push(ty);
        }
        PUTFIELD => {
            let ty = pool.field_type(pool_index(instr)?)?;
            data.pop_slots(usize::from(ty.stack_size()) + 1)?;
        }
        INVOKEVIRTUAL | INVOKESPECIAL | INVOKESTATIC | INVOKEINTERFACE | INVOKEDYNAMIC => {
            let md = pool.method_descriptor(pool_index(instr)?)?;
            let receiver = usize::from(!matches!(instr.opcode, INVOKESTATIC | INVOKEDYNAMIC));
            data.pop_slots(usize::from(md.params_stack_size()) + receiver)?;
            data.push(md.ret);
        }
        NEW => data.push(pool.class_type(pool_index(instr)?)?),
        NEWARRAY => {
            data.pop()?;
            let atype = instr.operand(0).unwrap_or_default();
            let element = primitive_array_element(atype).ok_or_else(|| {
                malformed_error!("Invalid newarray type {} at offset {}", atype, instr.offset)
            })?;
            data.push(element.array_of(1));
        }
        ANEWARRAY => {
            data.pop()?;
            data.push(pool.class_type(pool_index(instr)?)?.array_of(1));
        }
        CHECKCAST => {
            data.pop()?;
            data.push(pool.class_type(pool_index(instr)?)?);
        }
        MULTIANEWARRAY => {
            let dims = instr
                .operand(1)
                .and_then(|d| usize::try_from(d).ok())
                .unwrap_or(1);
            data.pop_slots(dims)?;
            data.push(pool.class_type(pool_index(instr)?)?);
        }
        other => {
            return Err(malformed_error!(
                "Unsupported opcode 0x{:02X} at offset {}",
                other,
                instr.offset
            ))
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::ResolvedPool;

    fn run(data: &mut DataPoint, instrs: &[Instruction]) {
        let pool = ResolvedPool::new()
            .with_field(3, VarType::LONG)
            .with_method(4, MethodDescriptor::parse("(IJ)Ljava/lang/String;").unwrap());
        for instr in instrs {
            step_types(data, instr, &pool).unwrap();
        }
    }

    #[test]
    fn test_long_values_take_two_slots() {
        let mut data = DataPoint::default();
        run(
            &mut data,
            &[
                Instruction::simple(LCONST_1, 0),
                Instruction::simple(LCONST_0, 1),
                Instruction::simple(LADD, 2),
            ],
        );
        assert_eq!(data.stack, vec![VarType::LONG, VarType::GROUP2EMPTY]);
        run(&mut data, &[Instruction::create(LSTORE, vec![2], 3)]);
        assert!(data.stack.is_empty());
        assert_eq!(data.local(2), Some(&VarType::LONG));
        assert_eq!(data.locals[3], VarType::GROUP2EMPTY);
    }

    #[test]
    fn test_jsr_pushes_address_and_astore_keeps_it() {
        let mut data = DataPoint::default();
        run(
            &mut data,
            &[
                Instruction::jump(JSR, 10, 0),
                Instruction::create(ASTORE, vec![1], 10),
            ],
        );
        assert_eq!(data.local(1), Some(&VarType::ADDRESS));
    }

    #[test]
    fn test_dup_family() {
        let mut data = DataPoint::default();
        data.push(VarType::INT);
        data.push(VarType::FLOAT);
        run(&mut data, &[Instruction::simple(DUP_X1, 0)]);
        assert_eq!(
            data.stack,
            vec![VarType::FLOAT, VarType::INT, VarType::FLOAT]
        );

        let mut data = DataPoint::default();
        data.push(VarType::DOUBLE);
        run(&mut data, &[Instruction::simple(DUP2, 0)]);
        assert_eq!(data.stack.len(), 4);
        assert_eq!(data.stack[2], VarType::DOUBLE);
    }

    #[test]
    fn test_invoke_and_fields_use_pool() {
        let mut data = DataPoint::default();
        data.push(VarType::root_object());
        data.push(VarType::INT);
        data.push(VarType::LONG);
        run(&mut data, &[Instruction::create(INVOKEVIRTUAL, vec![4], 0)]);
        assert_eq!(data.stack, vec![VarType::object("java/lang/String")]);

        run(&mut data, &[Instruction::create(GETFIELD, vec![3], 3)]);
        assert_eq!(data.stack, vec![VarType::LONG, VarType::GROUP2EMPTY]);
    }

    #[test]
    fn test_underflow_is_malformed() {
        let mut data = DataPoint::default();
        let pool = ResolvedPool::new();
        let res = step_types(&mut data, &Instruction::simple(IADD, 0), &pool);
        assert!(matches!(res, Err(crate::Error::Malformed { .. })));
    }

    #[test]
    fn test_initial_point() {
        let md = MethodDescriptor::parse("(JI)V").unwrap();
        let data = DataPoint::initial(&md, false, "a/B");
        assert_eq!(data.local(0), Some(&VarType::object("a/B")));
        assert_eq!(data.local(1), Some(&VarType::LONG));
        assert_eq!(data.local(3), Some(&VarType::INT));
    }
}
